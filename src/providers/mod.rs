mod planning_center;
mod traits;

pub use planning_center::PlanningCenterProvider;
pub use traits::{OAuthProvider, TokenSet};
