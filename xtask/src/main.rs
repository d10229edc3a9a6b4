use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Meshdrop 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建守护进程和 CLI (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 安装 systemd 用户服务
    Install,
    /// 卸载 systemd 用户服务
    Uninstall,
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => std::path::PathBuf::from(dir)
            .parent()
            .map(std::path::Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("无法定位项目根目录"))?,
        Err(_) => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev { log_level } => dev(&sh, &log_level)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p meshdrop-daemon -p meshdrop-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, log_level: &str) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    let rust_log = format!("{level},meshdrop_core={level}", level = log_level);
    println!("   RUST_LOG={}", rust_log);

    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p meshdrop-daemon").run()?;
    Ok(())
}

/// 返回 (二进制目录, systemd 用户单元目录)
fn install_dirs() -> Result<(std::path::PathBuf, std::path::PathBuf)> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME 未设置"))?;
    let home = std::path::PathBuf::from(home);
    Ok((home.join(".local/bin"), home.join(".config/systemd/user")))
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 Meshdrop 服务...");

    build(sh)?;

    // 先停止已运行的服务（如果存在）
    println!("⏹️  停止现有服务...");
    let _ = cmd!(sh, "systemctl --user stop meshdrop.service").run();

    let (bin_dir, unit_dir) = install_dirs()?;
    sh.create_dir(&bin_dir)?;
    sh.create_dir(&unit_dir)?;

    println!("📋 复制二进制文件...");
    cmd!(sh, "cp target/release/meshdrop-daemon {bin_dir}/").run()?;
    cmd!(sh, "cp target/release/meshdrop {bin_dir}/").run()?;

    cmd!(sh, "cp assets/meshdrop.service {unit_dir}/").run()?;

    cmd!(sh, "systemctl --user daemon-reload").run()?;
    cmd!(sh, "systemctl --user enable --now meshdrop.service").run()?;

    println!("✅ 服务安装完成");
    println!("   使用 'meshdrop --help' 查看命令");
    println!("   使用 'systemctl --user status meshdrop' 查看服务状态");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 Meshdrop 服务...");

    let _ = cmd!(sh, "systemctl --user disable --now meshdrop.service").run();

    let (bin_dir, unit_dir) = install_dirs()?;
    let _ = cmd!(sh, "rm -f {bin_dir}/meshdrop-daemon {bin_dir}/meshdrop").run();
    let _ = cmd!(sh, "rm -f {unit_dir}/meshdrop.service").run();

    cmd!(sh, "systemctl --user daemon-reload").run()?;

    println!("✅ 卸载完成");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let version = env!("CARGO_PKG_VERSION");
    let dist_name = format!("meshdrop-{}-linux-x86_64", version);

    cmd!(sh, "mkdir -p dist/{dist_name}").run()?;
    cmd!(sh, "cp target/release/meshdrop-daemon dist/{dist_name}/").run()?;
    cmd!(sh, "cp target/release/meshdrop dist/{dist_name}/").run()?;
    cmd!(sh, "cp assets/meshdrop.service dist/{dist_name}/").run()?;

    sh.change_dir("dist");
    cmd!(sh, "tar -czvf {dist_name}.tar.gz {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    cmd!(
        sh,
        "cargo tarpaulin --packages meshdrop-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    cmd!(sh, "rm -rf dist").run()?;
    println!("✅ 清理完成");
    Ok(())
}
