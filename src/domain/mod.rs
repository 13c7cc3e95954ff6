pub mod notification;

pub use notification::{
    Action, Entity, ListChangeNotification, NotificationData, NotificationKind, SingleChangeNotification,
};
