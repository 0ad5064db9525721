//! Route paths served by the router.

pub const GET_API_HEALTH: &str = "/api/health";

pub const GET_STUDENTS_ME_STATUS: &str = "/students/me/status";
pub const GET_STUDENTS_ID_STATUS: &str = "/students/{id}/status";
pub const GET_STUDENTS_ID_ACTIVITY: &str = "/students/{id}/activity";

pub const POST_PASSES_LOCAL: &str = "/passes/local";
pub const POST_PASSES_OUTSTATION: &str = "/passes/outstation";
pub const GET_PASSES_MINE: &str = "/passes/mine";
pub const GET_PASSES_QUEUE: &str = "/passes/queue";
pub const GET_PASSES_ID: &str = "/passes/{id}";
pub const POST_PASSES_ID_DECISION: &str = "/passes/{id}/decision";

pub const POST_TOKENS: &str = "/tokens";
pub const DELETE_TOKENS_MINE: &str = "/tokens/mine";

pub const POST_GATE_REDEEM: &str = "/gate/redeem";
pub const POST_GATE_DECIDE: &str = "/gate/decide";

pub const POST_ADMIN_STUDENTS: &str = "/admin/students";
/// `POST` bans, `DELETE` lifts the ban.
pub const ADMIN_STUDENTS_ID_BAN: &str = "/admin/students/{id}/ban";

pub const GET_EVENTS: &str = "/events";
