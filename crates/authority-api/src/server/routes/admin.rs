async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connections": state.directory().len(),
    }))
}

async fn space_status(
    Path(space_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HttpApiError> {
    let inner = state.inner.lock().await;
    let status = inner
        .status(&space_id)
        .ok_or_else(|| HttpApiError::space_not_found(&space_id))?;
    Ok(Json(status))
}

async fn server_metrics(State(state): State<AppState>) -> Json<ServerMetrics> {
    Json(state.inner.lock().await.metrics())
}

async fn refresh_rules(
    Path(space_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpApiError> {
    require_admin(&state, &headers)?;
    ensure_space(&state, &space_id)
        .await
        .map_err(|err| HttpApiError::from_collaborator(&space_id, err))?;

    let source = state.collaborators.rules.clone();
    let requested = space_id.clone();
    let rules = tokio::task::spawn_blocking(move || source.rule_context(&requested))
        .await
        .map_err(|err| HttpApiError::internal("rule lookup aborted", Some(err.to_string())))?
        .map_err(|err| HttpApiError::from_collaborator(&space_id, err))?
        .unwrap_or_default();

    state.inner.lock().await.set_rules(&space_id, rules.clone());
    info!(space_id = %space_id, "rules refreshed");
    Ok(Json(rules))
}

async fn override_weather(
    Path(space_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WeatherOverride>,
) -> Result<impl IntoResponse, HttpApiError> {
    require_admin(&state, &headers)?;
    ensure_space(&state, &space_id)
        .await
        .map_err(|err| HttpApiError::from_collaborator(&space_id, err))?;

    let (environment, effects) = state
        .inner
        .lock()
        .await
        .override_weather(&space_id, &request, now_ms())
        .map_err(HttpApiError::from_rejection)?;
    state.effects.route(effects, now_ms());
    info!(space_id = %space_id, preset = ?request.preset, "weather overridden");
    Ok(Json(environment))
}

async fn schedule_event(
    Path(space_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScheduleEventRequest>,
) -> Result<impl IntoResponse, HttpApiError> {
    require_admin(&state, &headers)?;
    ensure_space(&state, &space_id)
        .await
        .map_err(|err| HttpApiError::from_collaborator(&space_id, err))?;

    let (event, effects) = state
        .inner
        .lock()
        .await
        .schedule_event(&space_id, request, now_ms())
        .map_err(HttpApiError::from_rejection)?;
    state.effects.route(effects, now_ms());
    info!(space_id = %space_id, event_id = %event.id, run_at = event.run_at, "environment event scheduled");
    Ok((StatusCode::CREATED, Json(event)))
}

/// Accepts the configured static admin token or any signed token carrying
/// the admin role.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), HttpApiError> {
    let Some(token) = bearer_token(headers) else {
        return Err(HttpApiError::unauthorized("missing bearer token"));
    };
    if state.admin_token.as_deref() == Some(token) {
        return Ok(());
    }
    let claims = state
        .signer
        .verify(token, now_ms())
        .map_err(|err| HttpApiError::unauthorized(format!("invalid token: {err}")))?;
    if Identity::from_claims(claims).highest_role() == Role::Admin {
        Ok(())
    } else {
        Err(HttpApiError::unauthorized("admin role required"))
    }
}
