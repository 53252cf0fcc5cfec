//! Roles and the capability check applied before every command.

use teloxide::types::UserId;

use crate::config::Config;

/// Who is talking to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User,
    Admin,
    Owner,
}

/// What a command needs from its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Lookups and self-service commands.
    Use,
    /// User management, codes, stats, broadcasts.
    Moderate,
    /// Admin roster, global toggles, full backups.
    Administer,
}

impl Role {
    /// Resolve a caller's role from configuration and the stored admin flag.
    pub fn resolve(config: &Config, user_id: UserId, stored_admin: bool) -> Self {
        if config.is_owner(user_id) {
            Role::Owner
        } else if stored_admin || config.admin_ids.contains(&user_id) {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        match capability {
            Capability::Use => true,
            Capability::Moderate => self >= Role::Admin,
            Capability::Administer => self == Role::Owner,
        }
    }

    /// Staff skip the force-join, ban and private-chat gates.
    pub fn is_staff(self) -> bool {
        self >= Role::Admin
    }
}
