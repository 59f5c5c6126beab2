use stockledger_core::UserId;

/// Operator performing the request.
///
/// Present on every ledger route; recorded as `created_by`, `approved_by`,
/// `counted_by` and so on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
