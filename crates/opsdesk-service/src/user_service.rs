//! Identity store orchestration: accounts, role bindings and credentials.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument, warn};

use opsdesk_core::user::normalize_email;
use opsdesk_core::{
    AuditAction, Auditable, BindingMode, Claims, ClientMeta, CoreError, CoreResult, EntityRef,
    MutationKind, Page, PageLimits, PageRequest, PasswordHasher, RequestContext, ResourceType,
    RoleBindingRepository, RoleId, User, UserDetails, UserFilter, UserId, UserRepository,
    UserStatus,
};

use crate::audit::{best_effort_pre_image, AuditRecorder};

const MIN_PASSWORD_LEN: usize = 8;

/// Input for [`UserService::create_user`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Defaults to `active`.
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

/// Input for [`UserService::update_user`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    /// Full replace of the user's role set.
    pub role_ids: Option<Vec<RoleId>>,
}

impl UpdateUser {
    /// Status and role changes need `USER:UPDATE` even on the caller's own account.
    #[must_use]
    pub fn touches_elevated_fields(&self) -> bool {
        self.status.is_some() || self.role_ids.is_some()
    }
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    bindings: Arc<dyn RoleBindingRepository>,
    hasher: Arc<dyn PasswordHasher>,
    audit: Arc<AuditRecorder>,
    limits: PageLimits,
}

impl UserService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        bindings: Arc<dyn RoleBindingRepository>,
        hasher: Arc<dyn PasswordHasher>,
        audit: Arc<AuditRecorder>,
        limits: PageLimits,
    ) -> Self {
        Self {
            users,
            bindings,
            hasher,
            audit,
            limits,
        }
    }

    /// Returns the stored account; [`get_user`](Self::get_user) adds its roles.
    #[instrument(skip_all)]
    pub async fn create_user(&self, ctx: &RequestContext, input: CreateUser) -> CoreResult<User> {
        let name = validate_name(&input.name)?;
        let email = validate_email(&input.email)?;
        validate_password(&input.password)?;

        if self.users.get_by_email(&email).await?.is_some() {
            return Err(CoreError::already_exists("user", email));
        }

        let password_hash = self.hasher.hash(&input.password)?;
        let user = User::new(
            name,
            &email,
            password_hash,
            input.status.unwrap_or(UserStatus::Active),
        );

        let user_id = user.user_id;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Create,
                None,
                async {
                    self.users.create(&user, &input.role_ids).await?;
                    Ok(user)
                },
                || self.user_image(user_id),
            )
            .await
    }

    /// Applies the changed fields. `role_ids`, when given, replaces the role set
    /// in the same transaction as the row update.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        input: UpdateUser,
    ) -> CoreResult<User> {
        let name = input.name.as_deref().map(validate_name).transpose()?;
        let email = input.email.as_deref().map(validate_email).transpose()?;
        let before =
            best_effort_pre_image("user", &user_id.to_string(), self.find_details(user_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    let mut user = self.live_user(user_id).await?;
                    if let Some(name) = name {
                        user.name = name.to_string();
                    }
                    if let Some(email) = &email {
                        user.email.clone_from(email);
                    }
                    if let Some(status) = input.status {
                        user.transition_to(status);
                    }
                    user.touch();

                    self.users.update(&user, input.role_ids.as_deref()).await?;
                    Ok(user)
                },
                || self.user_image(user_id),
            )
            .await
    }

    /// Tombstones the account and drops its role bindings. The row stays for
    /// the audit trail.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn delete_user(&self, ctx: &RequestContext, user_id: UserId) -> CoreResult<()> {
        let before =
            best_effort_pre_image("user", &user_id.to_string(), self.find_details(user_id).await)?;

        self.audit
            .mutate(ctx, MutationKind::Delete, before, async {
                self.users.soft_delete(user_id, Utc::now()).await?;
                Ok(EntityRef::new(ResourceType::User, user_id.to_string()))
            })
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: UserId) -> CoreResult<UserDetails> {
        self.details(user_id).await
    }

    pub async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        self.users.get_by_email(&normalize_email(email)).await
    }

    pub async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> CoreResult<Page<User>> {
        self.users.list(filter, page.normalize(self.limits)).await
    }

    /// Binds roles to a user.
    ///
    /// `Merge` unions with the current set and rejects an empty list.
    /// `Replace` makes `role_ids` the whole set; an empty list clears it.
    #[instrument(skip_all, fields(%user_id, ?mode, count = role_ids.len()))]
    pub async fn assign_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_ids: &[RoleId],
        mode: BindingMode,
    ) -> CoreResult<()> {
        if role_ids.is_empty() && mode == BindingMode::Merge {
            return Err(CoreError::bad_request("role id list must not be empty"));
        }
        let before =
            best_effort_pre_image("user", &user_id.to_string(), self.find_details(user_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    self.bindings.assign(user_id, role_ids, mode).await?;
                    Ok(EntityRef::new(ResourceType::User, user_id.to_string()))
                },
                || self.user_image(user_id),
            )
            .await?;
        Ok(())
    }

    /// Unbinds roles. Roles the user never held are ignored.
    #[instrument(skip_all, fields(%user_id, count = role_ids.len()))]
    pub async fn remove_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> CoreResult<()> {
        if role_ids.is_empty() {
            return Err(CoreError::bad_request("role id list must not be empty"));
        }
        let before =
            best_effort_pre_image("user", &user_id.to_string(), self.find_details(user_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    self.bindings.remove(user_id, role_ids).await?;
                    Ok(EntityRef::new(ResourceType::User, user_id.to_string()))
                },
                || self.user_image(user_id),
            )
            .await?;
        Ok(())
    }

    /// Verifies credentials and returns the caller's claims.
    ///
    /// Unknown email and wrong password produce the same error.
    #[instrument(skip_all)]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client: ClientMeta,
    ) -> CoreResult<Claims> {
        let email = normalize_email(email);
        let Some(mut user) = self.users.get_by_email(&email).await? else {
            warn!("login rejected: unknown account");
            return Err(invalid_credentials());
        };
        if !self.hasher.verify(password, &user.password_hash)? {
            warn!(user_id = %user.user_id, "login rejected: wrong password");
            return Err(invalid_credentials());
        }
        if !user.is_enabled() {
            warn!(user_id = %user.user_id, status = user.status.as_str(), "login rejected: account not active");
            return Err(CoreError::forbidden("account is not active"));
        }

        user.record_login();
        self.users.record_login(user.user_id, user.updated_at).await?;

        let claims = Claims::new(user.user_id, user.email.clone(), user.name.clone());
        let ctx = RequestContext::new(claims.clone()).with_client(client);
        self.audit
            .record(
                &ctx,
                AuditAction::Login,
                ResourceType::User,
                user.user_id.to_string(),
                json!({ "email": user.email }),
            )
            .await;
        info!(user_id = %user.user_id, "user logged in");
        Ok(claims)
    }

    pub async fn logout(&self, ctx: &RequestContext) -> CoreResult<()> {
        let claims = ctx.claims()?;
        self.audit
            .record(
                ctx,
                AuditAction::Logout,
                ResourceType::User,
                claims.user_id.to_string(),
                json!({ "email": claims.email }),
            )
            .await;
        Ok(())
    }

    /// Replaces the password hash after checking the current password.
    ///
    /// The audit entry carries the usual before/after profile images, which
    /// never include the hash.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> CoreResult<()> {
        validate_password(new_password)?;
        let mut user = self.live_user(user_id).await?;
        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(CoreError::forbidden("current password is incorrect"));
        }
        let before =
            best_effort_pre_image("user", &user_id.to_string(), self.find_details(user_id).await)?;
        let new_hash = self.hasher.hash(new_password)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    user.touch();
                    self.users
                        .set_password_hash(user_id, &new_hash, user.updated_at)
                        .await?;
                    user.password_hash = new_hash;
                    Ok(user)
                },
                || self.user_image(user_id),
            )
            .await?;
        Ok(())
    }

    async fn live_user(&self, user_id: UserId) -> CoreResult<User> {
        self.users
            .get(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id.to_string()))
    }

    async fn find_details(&self, user_id: UserId) -> CoreResult<Option<UserDetails>> {
        let Some(user) = self.users.get(user_id).await? else {
            return Ok(None);
        };
        let role_ids = self.bindings.role_ids_for_user(user_id).await?;
        Ok(Some(UserDetails { user, role_ids }))
    }

    async fn user_image(&self, user_id: UserId) -> CoreResult<Option<JsonValue>> {
        Ok(self.find_details(user_id).await?.map(|details| details.snapshot()))
    }

    async fn details(&self, user_id: UserId) -> CoreResult<UserDetails> {
        self.find_details(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id.to_string()))
    }
}

fn invalid_credentials() -> CoreError {
    CoreError::forbidden("invalid email or password")
}

fn validate_name(name: &str) -> CoreResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_request("user name must not be empty"));
    }
    Ok(name)
}

fn validate_email(email: &str) -> CoreResult<String> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(CoreError::bad_request(format!("invalid email address `{email}`"))),
    }
}

fn validate_password(password: &str) -> CoreResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
