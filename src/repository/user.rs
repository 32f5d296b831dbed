use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{RepositoryContext, patch_actions, record_item};
use crate::consistency::{FailurePolicy, FailureResolution, UniqueConstraintIndex};
use crate::core::{DomainError, EntityKind, ItemKey, Result, TableSchema, Value, from_item};
use crate::storage::{Condition, WriteOp};

const USER_PARTITION: &str = "USER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: i64, email: &str, name: &str) -> Self {
        Self {
            user_id,
            email: email.to_string(),
            name: name.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        }
    }
}

/// Profile fields only; the email moves through [`UserRepository::change_email`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip)]
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

pub fn user_key(user_id: i64) -> ItemKey {
    ItemKey::new(USER_PARTITION, user_id)
}

pub struct UserRepository {
    ctx: RepositoryContext,
    emails: UniqueConstraintIndex,
}

impl UserRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        let emails = UniqueConstraintIndex::new(
            TableSchema::new(&ctx.tables.user, "id", "userId"),
            "EMAIL",
            "email",
        );
        Self { ctx, emails }
    }

    fn table(&self) -> &str {
        &self.ctx.tables.user
    }

    pub async fn save_if_not_exists_or_throw(&self, user: &User) -> Result<()> {
        let item = record_item(user, Some(("id", USER_PARTITION)))?;
        let ops = vec![
            WriteOp::put(self.table(), item, Condition::NotExists),
            self.emails.reserve(&user.email, user.user_id),
        ];
        let policy = FailurePolicy::new()
            .on(0, DomainError::DuplicateKey(EntityKind::User))
            .on(1, self.emails.violation(&user.email));
        self.ctx.coordinator.submit(ops, &policy).await?;
        info!(user_id = user.user_id, "user created");
        Ok(())
    }

    pub async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let item = self.ctx.get(self.table(), &user_key(user_id)).await?;
        item.map(|item| from_item(&item).map_err(DomainError::from))
            .transpose()
    }

    pub async fn find_by_id_or_throw(&self, user_id: i64) -> Result<User> {
        self.find_by_id(user_id)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::User))
    }

    /// Resolves the email through its marker, then loads the owner.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.emails.owner_of(&self.ctx.store, email).await? {
            Some(user_id) => Ok(self
                .find_by_id(user_id)
                .await?
                .filter(|user| user.email == email)),
            None => Ok(None),
        }
    }

    pub async fn find_by_email_or_throw(&self, email: &str) -> Result<User> {
        self.find_by_email(email)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::User))
    }

    pub async fn save_if_exists_or_throw(&self, patch: &UserPatch) -> Result<()> {
        let actions = patch_actions(patch, &[self.emails.field()])?;
        if actions.is_empty() {
            return Ok(());
        }
        self.ctx
            .coordinator
            .write(
                WriteOp::update(self.table(), user_key(patch.user_id), actions, Condition::Exists),
                FailureResolution::Fail(DomainError::NotFound(EntityKind::User)),
            )
            .await?;
        Ok(())
    }

    pub async fn change_email(&self, user_id: i64, email: &str) -> Result<()> {
        self.ctx
            .retry
            .run("user.change_email", move || self.try_change_email(user_id, email))
            .await
    }

    async fn try_change_email(&self, user_id: i64, email: &str) -> Result<()> {
        let current = self.find_by_id_or_throw(user_id).await?;
        if current.email == email {
            return Ok(());
        }
        let ops = self
            .emails
            .rename(user_key(user_id), user_id, &current.email, email);
        self.ctx
            .coordinator
            .submit(ops, &self.emails.rename_policy(email))
            .await?;
        debug!(user_id, "user email changed");
        Ok(())
    }

    /// Deletes the user and frees their email. Absence is success.
    pub async fn delete_if_exists_or_throw(&self, user_id: i64) -> Result<()> {
        self.ctx
            .retry
            .run("user.delete", move || self.try_delete(user_id))
            .await
    }

    async fn try_delete(&self, user_id: i64) -> Result<()> {
        let Some(current) = self.find_by_id(user_id).await? else {
            debug!(user_id, "user already absent");
            return Ok(());
        };
        let ops = vec![
            WriteOp::delete(
                self.table(),
                user_key(user_id),
                Condition::exists_with(vec![(self.emails.field(), Value::from(current.email.as_str()))]),
            ),
            self.emails.release(&current.email),
        ];
        self.ctx.coordinator.submit(ops, &FailurePolicy::new()).await?;
        Ok(())
    }
}
