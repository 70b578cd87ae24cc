pub mod ledger;

pub use ledger::{
    NotificationChannel, NotificationLedger, NotificationStatus, NotificationType,
    PgNotificationLedger, SentNotification,
};
