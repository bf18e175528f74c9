use super::*;

use async_trait::async_trait;

#[derive(Debug, Deserialize)]
pub(super) struct RegisterRequest {
    code: String,
}

#[derive(Debug, Serialize)]
pub(super) struct RegisterResponse {
    token: String,
}

/// `POST /register`: OAuth code in, session token out. The exchange is
/// terminal on failure since the provider consumes the code either way.
pub(super) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);

    let code =
        non_empty(payload.code).ok_or_else(|| validation_error("code", "Code is required."))?;

    let identity = match state.identity.authenticate(&code).await {
        Ok(identity) => identity,
        Err(error) => {
            emit_register_failure_event(&state, &request_id, &error);
            return Err(map_identity_error(error));
        }
    };

    let (user, new_user) = find_or_create_user(&state.store, &identity).await?;

    let issued = state
        .session_issuer
        .issue(&user)
        .map_err(map_session_error)?;

    state.observability.audit(
        AuditEvent::new("auth.register.completed", request_id.clone())
            .with_user_id(user.id.to_string())
            .with_attribute("provider", state.identity.name())
            .with_attribute("new_user", new_user.to_string()),
    );
    state
        .observability
        .increment_counter("auth.register.completed", &request_id);

    Ok((
        StatusCode::OK,
        Json(RegisterResponse {
            token: issued.token,
        }),
    ))
}

/// The two identity-store calls the register flow needs, behind a trait
/// so the conflict path can be staged in tests.
#[async_trait]
pub(super) trait UserAccounts: Send + Sync {
    async fn find_by_provider_id(&self, provider_user_id: i64) -> Option<UserRecord>;
    async fn create(&self, input: CreateUserInput) -> Result<UserRecord, StoreError>;
}

#[async_trait]
impl UserAccounts for Store {
    async fn find_by_provider_id(&self, provider_user_id: i64) -> Option<UserRecord> {
        self.find_user_by_provider_id(provider_user_id).await
    }

    async fn create(&self, input: CreateUserInput) -> Result<UserRecord, StoreError> {
        self.create_user(input).await
    }
}

/// Lookup-before-create keyed on the provider user id. A create conflict
/// means a concurrent first login won the race; the lookup is retried
/// once and the winner's record is used.
async fn find_or_create_user(
    accounts: &dyn UserAccounts,
    identity: &ExternalIdentity,
) -> Result<(UserRecord, bool), ApiErrorTuple> {
    if let Some(user) = accounts
        .find_by_provider_id(identity.provider_user_id)
        .await
    {
        return Ok((user, false));
    }

    match accounts
        .create(CreateUserInput {
            provider_user_id: identity.provider_user_id,
            login: identity.login.clone(),
            name: identity.name.clone(),
            avatar_url: identity.avatar_url.clone(),
        })
        .await
    {
        Ok(user) => Ok((user, true)),
        Err(StoreError::Conflict { .. }) => accounts
            .find_by_provider_id(identity.provider_user_id)
            .await
            .map(|user| (user, false))
            .ok_or_else(|| {
                error_response(
                    ApiErrorCode::InternalError,
                    "User creation conflicted but the winning record is missing.",
                )
            }),
        Err(error) => Err(map_store_error(error)),
    }
}

fn emit_register_failure_event(state: &AppState, request_id: &str, error: &IdentityError) {
    let reason = match error {
        IdentityError::Upstream { .. } => "upstream_auth",
        IdentityError::MalformedResponse { .. } => "upstream_contract",
        IdentityError::Unavailable { .. } => "service_unavailable",
    };

    state.observability.audit(
        AuditEvent::new("auth.register.failed", request_id.to_string())
            .with_outcome("failure")
            .with_attribute("provider", state.identity.name())
            .with_attribute("reason", reason.to_string()),
    );
    state
        .observability
        .increment_counter("auth.register.failed", request_id);
}
