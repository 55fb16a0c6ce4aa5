/// Notifications
///
/// Stored rows for client polling plus the fan-out that decides between a
/// live push and a stored row.

mod fanout;
mod store;

pub use fanout::{Delivery, NotificationFanout};
pub use store::NotificationStore;
