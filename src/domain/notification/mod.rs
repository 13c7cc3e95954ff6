pub mod model;

pub use model::{
    Action, Entity, ListChangeNotification, NotificationData, NotificationKind,
    SingleChangeNotification,
};
