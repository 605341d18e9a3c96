pub mod manager;
pub mod model;

pub use manager::SessionManager;
pub use model::{extract_info, extract_reward, Session, SessionStatus};
