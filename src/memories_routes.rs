use super::*;

const EXCERPT_CHARS: usize = 115;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateMemoryRequest {
    content: String,
    cover_url: String,
    #[serde(default)]
    is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateMemoryRequest {
    content: String,
    cover_url: String,
    #[serde(default)]
    is_public: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MemorySummary {
    id: Uuid,
    cover_url: String,
    excerpt: String,
    created_at: DateTime<Utc>,
}

/// `GET /memories`: the caller's own records, oldest first, projected to
/// summaries. Never mixes in other owners' records, public or not.
pub(super) async fn list_memories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let subject = require_subject(&state, &headers)?;

    let memories = state.store.list_memories_by_owner(subject.user_id).await;
    let summaries: Vec<MemorySummary> = memories
        .into_iter()
        .map(|memory| MemorySummary {
            id: memory.id,
            cover_url: memory.cover_url,
            excerpt: excerpt(&memory.content),
            created_at: memory.created_at,
        })
        .collect();

    Ok(Json(summaries))
}

/// `GET /memories/:id`: the one read that admits anonymous callers.
/// Existence is checked before access so a missing record reads as 404
/// while a real-but-private one reads as a denial.
pub(super) async fn get_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let id = parse_memory_id(&id)?;
    let subject = optional_subject(&state, &headers)?;

    let memory = state
        .store
        .find_memory(id)
        .await
        .ok_or_else(|| not_found_error("Memory not found."))?;

    if !policy::read_access(subject.as_ref(), memory.owner_id, memory.is_public).is_allowed() {
        return Err(forbidden_error("You are not allowed to view this memory."));
    }

    Ok(Json(memory))
}

pub(super) async fn create_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMemoryRequest>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let subject = require_subject(&state, &headers)?;

    let memory = state
        .store
        .create_memory(CreateMemoryInput {
            owner_id: subject.user_id,
            content: payload.content,
            cover_url: payload.cover_url,
            is_public: payload.is_public,
        })
        .await
        .map_err(map_store_error)?;

    state.observability.audit(
        AuditEvent::new("memory.created", request_id.clone())
            .with_user_id(subject.user_id.to_string())
            .with_attribute("memory_id", memory.id.to_string()),
    );
    state
        .observability
        .increment_counter("memory.created", &request_id);

    Ok((StatusCode::CREATED, Json(memory)))
}

pub(super) async fn update_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateMemoryRequest>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let id = parse_memory_id(&id)?;
    let subject = require_subject(&state, &headers)?;

    let existing = state
        .store
        .find_memory(id)
        .await
        .ok_or_else(|| not_found_error("Memory not found."))?;

    if !policy::write_access(Some(&subject), existing.owner_id).is_allowed() {
        return Err(forbidden_error("You are not allowed to edit this memory."));
    }

    let memory = state
        .store
        .update_memory(
            id,
            UpdateMemoryInput {
                content: payload.content,
                cover_url: payload.cover_url,
                is_public: payload.is_public,
            },
        )
        .await
        .map_err(map_store_error)?;

    state.observability.audit(
        AuditEvent::new("memory.updated", request_id.clone())
            .with_user_id(subject.user_id.to_string())
            .with_attribute("memory_id", memory.id.to_string()),
    );
    state
        .observability
        .increment_counter("memory.updated", &request_id);

    Ok(Json(memory))
}

pub(super) async fn delete_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let id = parse_memory_id(&id)?;
    let subject = require_subject(&state, &headers)?;

    let existing = state
        .store
        .find_memory(id)
        .await
        .ok_or_else(|| not_found_error("Memory not found."))?;

    if !policy::write_access(Some(&subject), existing.owner_id).is_allowed() {
        return Err(forbidden_error(
            "You are not allowed to delete this memory.",
        ));
    }

    state
        .store
        .delete_memory(id)
        .await
        .map_err(map_store_error)?;

    state.observability.audit(
        AuditEvent::new("memory.deleted", request_id.clone())
            .with_user_id(subject.user_id.to_string())
            .with_attribute("memory_id", id.to_string()),
    );
    state
        .observability
        .increment_counter("memory.deleted", &request_id);

    Ok(StatusCode::NO_CONTENT)
}

fn parse_memory_id(raw: &str) -> Result<Uuid, ApiErrorTuple> {
    Uuid::parse_str(raw).map_err(|_| validation_error("id", "Memory id must be a UUID."))
}

/// Counted in characters so the cut never lands inside a multi-byte
/// sequence. The ellipsis is appended unconditionally.
fn excerpt(content: &str) -> String {
    let mut excerpt: String = content.chars().take(EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}
