//! 引擎事件的原始 JSON 结构
//!
//! `children` 是以 id 为键的对象，反序列化时必须保留键的出现顺序，
//! 所以这里用自定义 visitor 收集为有序列表，而不是 `BTreeMap`。
//! 载荷保持为原始文本再解析：`serde_json::Value` 会按键重新排序。

use serde::de::{DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;

/// 第一阶段：通用信封
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl Envelope {
    /// 第二阶段：按具体类型解析 `data`
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.data.as_deref().map_or("null", RawValue::get))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRequest {
    #[serde(default)]
    pub peer: Option<String>,
    pub transfer: String,
    #[serde(default)]
    pub files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, deserialize_with = "ordered_children")]
    pub children: Vec<(String, RawFile)>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawStarted {
    pub transfer: String,
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawProgress {
    pub transfer: String,
    pub file: String,
    /// 引擎使用的字段名
    #[serde(rename = "transfered")]
    pub transferred: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFinished {
    pub transfer: String,
    pub reason: String,
    #[serde(default)]
    pub data: RawFinishedData,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawFinishedData {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub by_peer: Option<bool>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub final_path: Option<String>,
}

fn ordered_children<'de, D>(deserializer: D) -> Result<Vec<(String, RawFile)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ChildrenVisitor;

    impl<'de> Visitor<'de> for ChildrenVisitor {
        type Value = Vec<(String, RawFile)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of child files keyed by id")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut children = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, child)) = map.next_entry::<String, RawFile>()? {
                children.push((key, child));
            }
            Ok(children)
        }
    }

    deserializer.deserialize_any(ChildrenVisitor)
}
