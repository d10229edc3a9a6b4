//! 通知按钮动作

use super::EventManager;
use crate::error::FileshareError;
use crate::notify::{
    ActionKey, NotificationManager, ACCEPT_ERROR_GENERIC, ACCEPT_FAILED_SUMMARY,
    CANCEL_ERROR_GENERIC, CANCEL_FAILED_SUMMARY, TRANSFER_ALREADY_ACCEPTED,
    TRANSFER_NOT_CANCELABLE,
};
use crate::transfer::tree;
use log::{debug, warn};

impl EventManager {
    /// 执行用户在通知上点击的动作
    ///
    /// 失败通过错误通知反馈给用户，不返回给调用方。
    pub fn notification_action(&self, notification_id: u32, action: ActionKey) {
        let Some(notifications) = &self.notifications else {
            warn!("Notification action {action} received but notifications are disabled");
            return;
        };

        match action {
            ActionKey::AcceptTransfer => self.accept_from_notification(notifications, notification_id),
            ActionKey::CancelTransfer => self.cancel_from_notification(notifications, notification_id),
            ActionKey::OpenFile => {
                if !notifications.open_file(notification_id) {
                    debug!("Nothing to open for notification {notification_id}");
                }
            }
        }
    }

    fn accept_from_notification(&self, notifications: &NotificationManager, notification_id: u32) {
        let Some(transfer) = notifications
            .transfer_for(notification_id)
            .and_then(|id| self.registry.get(&id))
        else {
            notifications.notify_error(ACCEPT_FAILED_SUMMARY, ACCEPT_ERROR_GENERIC);
            return;
        };

        let required = tree::total_size(&transfer.files);
        let download_dir = match notifications.validate_download_dir(required) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot accept {} into download directory: {e}", transfer.id);
                notifications.notify_error(ACCEPT_FAILED_SUMMARY, &e.to_string());
                return;
            }
        };

        if let Err(e) =
            self.accept_transfer(&transfer.id, download_dir, &[], notifications.size_limit())
        {
            warn!("Failed to accept {} from notification: {e}", transfer.id);
            let body = match e {
                FileshareError::TransferAlreadyAccepted => TRANSFER_ALREADY_ACCEPTED,
                _ => ACCEPT_ERROR_GENERIC,
            };
            notifications.notify_error(ACCEPT_FAILED_SUMMARY, body);
        }
    }

    fn cancel_from_notification(&self, notifications: &NotificationManager, notification_id: u32) {
        let Some(id) = notifications.transfer_for(notification_id) else {
            notifications.notify_error(CANCEL_FAILED_SUMMARY, CANCEL_ERROR_GENERIC);
            return;
        };

        if let Err(e) = self.cancel_transfer(&id) {
            warn!("Failed to cancel {id} from notification: {e}");
            let body = match e {
                FileshareError::TransferNotCancelable => TRANSFER_NOT_CANCELABLE,
                _ => CANCEL_ERROR_GENERIC,
            };
            notifications.notify_error(CANCEL_FAILED_SUMMARY, body);
        }
    }
}
