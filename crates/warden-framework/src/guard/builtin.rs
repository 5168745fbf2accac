//! Builtin guards, enabled through descriptor flags.

use std::collections::HashSet;

use async_trait::async_trait;
use tower::BoxError;
use warden_core::ChatEvent;

use super::{Guard, GuardContext};

pub const GROUP_ONLY: &str = "group_only";
pub const ADMIN_ONLY: &str = "admin_only";
pub const BOT_ADMIN_ONLY: &str = "bot_admin_only";
pub const OWNER_ONLY: &str = "owner_only";

/// Rejects invocations outside group chats.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupOnly;

#[async_trait]
impl Guard for GroupOnly {
    fn name(&self) -> &str {
        GROUP_ONLY
    }

    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError> {
        if !ctx.event.is_group {
            ctx.reply("This command can only be used in groups.").await;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Rejects senders that are not group admins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminOnly;

#[async_trait]
impl Guard for AdminOnly {
    fn name(&self) -> &str {
        ADMIN_ONLY
    }

    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError> {
        if !ctx.event.is_admin {
            ctx.reply("This command is for group admins only.").await;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Rejects invocations when the bot itself lacks admin rights.
#[derive(Debug, Clone, Copy, Default)]
pub struct BotAdminOnly;

#[async_trait]
impl Guard for BotAdminOnly {
    fn name(&self) -> &str {
        BOT_ADMIN_ONLY
    }

    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError> {
        if !ctx.event.is_bot_admin {
            ctx.reply("The bot must be a group admin to run this command.")
                .await;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Rejects senders that are not bot owners.
///
/// A sender matches when either its full id or the part before `@` is
/// listed, so owners can be configured as bare phone numbers.
#[derive(Debug, Clone, Default)]
pub struct OwnerOnly {
    owners: HashSet<String>,
}

impl OwnerOnly {
    pub fn new<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_owner(&self, event: &ChatEvent) -> bool {
        self.owners.contains(&event.sender) || self.owners.contains(event.sender_local_part())
    }
}

#[async_trait]
impl Guard for OwnerOnly {
    fn name(&self) -> &str {
        OWNER_ONLY
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError> {
        if !self.is_owner(&ctx.event) {
            ctx.reply("This command is for the bot owner only.").await;
            return Ok(false);
        }
        Ok(true)
    }
}
