pub mod announcement;
pub mod dispatch;
pub mod fcm;
pub mod firestore;
pub mod health;
pub mod message;
pub mod status;
pub mod user;
