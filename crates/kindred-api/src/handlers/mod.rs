pub mod health;
pub mod notifications;

pub use health::health_check;
pub use notifications::{
    delete_all_read, delete_notification, list_notifications, mark_all_read, mark_read,
    mark_unread, mark_unread_batch,
};
