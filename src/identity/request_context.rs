/// Authenticated caller attached to a request once the gate admits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub identity_id: i64,
    pub account: String,
    /// Role snapshot from the token.
    pub roles: Vec<i64>,
    pub jti: String,
}
