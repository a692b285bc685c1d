/// The authenticated caller, as asserted by the fronting gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl Principal {
    /// Admins may act on any record; everyone else only on their own.
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}
