//! Execution permission levels (spec §4.5). Each transition procedure
//! declares the minimum level it requires; a transaction carries the level
//! its signer is entitled to.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    User,
    SuperUser,
    System,
}

impl PermissionLevel {
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        *self >= required
    }
}
