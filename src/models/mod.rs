pub mod assessment;
pub mod roster;

pub use assessment::{
    Action, AssessmentState, AssignmentDefinition, Definitions, Permission, StatusMap,
    normalize_definitions, normalize_name,
};
pub use roster::{GroupRoster, StudentMapping};
