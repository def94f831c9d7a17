#[derive(Debug, Default, Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

async fn open_socket(
    Path(space_id): Path<String>,
    Query(query): Query<SocketQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_socket(socket, state, space_id, query.token))
}

async fn run_socket(
    mut socket: WebSocket,
    state: AppState,
    space_id: String,
    token: Option<String>,
) {
    let (identity, token_error) =
        resolve_identity(&state.signer, token.as_deref(), now_ms(), &mut rand::thread_rng());
    if let Some(err) = token_error {
        warn!(space_id = %space_id, error = %err, "token rejected; continuing as guest");
    }

    if let Err(err) = prepare_admission(&state, &identity, &space_id).await {
        warn!(space_id = %space_id, user_id = %identity.user_id, error = %err, "connection refused");
        let _ = send_server_message(&mut socket, &ServerMessage::error(err.client_message())).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    // Subscribe before admitting so no room frame after session:ready is lost.
    let mut rooms = state.effects.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let admission = {
        let mut inner = state.inner.lock().await;
        match inner.admit(identity, &space_id, now_ms()) {
            Ok(admission) => {
                // The displaced socket is told and unrouted before this one
                // is registered, all under the lock.
                if let Some(previous) = admission.evicted {
                    state.directory().evict(previous, EVICTION_NOTICE);
                }
                state.directory().register(
                    admission.connection_id,
                    &space_id,
                    &admission.session.user_id,
                    tx,
                );
                admission
            }
            Err(rejection) => {
                drop(inner);
                warn!(space_id = %space_id, error = %rejection, "admission rejected");
                let _ = send_server_message(&mut socket, &ServerMessage::error("Space unavailable"))
                    .await;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    };
    let connection_id = admission.connection_id;
    info!(
        %connection_id,
        space_id = %space_id,
        user_id = %admission.session.user_id,
        roles = ?admission.session.roles,
        vessel_id = ?admission.session.vessel_id,
        "socket admitted"
    );
    state.effects.route(admission.effects, now_ms());

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, connection_id, &space_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            direct = rx.recv() => {
                match direct {
                    Some(Outbound::Frame(payload)) => {
                        if send_frame(&mut socket, &payload).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Evict(reason)) => {
                        let _ = send_server_message(&mut socket, &ServerMessage::error(reason)).await;
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            frame = rooms.recv() => {
                match frame {
                    Ok(frame) => {
                        if !frame.is_for(&space_id, connection_id) {
                            continue;
                        }
                        if send_frame(&mut socket, &frame.payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%connection_id, skipped, "socket lagged behind room broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    state.directory().unregister(connection_id);
    let effects = state.inner.lock().await.disconnect(connection_id, now_ms());
    state.effects.route(effects, now_ms());
    debug!(%connection_id, "socket closed");
}

async fn handle_text(state: &AppState, connection_id: ConnectionId, space_id: &str, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(%connection_id, error = %err, "unparseable client message");
            state
                .effects
                .send_to(connection_id, &ServerMessage::error(format!("Invalid message: {err}")));
            return;
        }
    };

    if let ClientMessage::UserAuth(auth) = message {
        reauthenticate(state, connection_id, space_id, auth.token.as_deref()).await;
        return;
    }

    let event = message.event_name();
    let effects = state
        .inner
        .lock()
        .await
        .handle(connection_id, message, now_ms());
    debug!(%connection_id, event, effects = effects.len(), "client message applied");
    state.effects.route(effects, now_ms());
}

/// `user:auth` mid-session. A bad token leaves the current identity alone.
async fn reauthenticate(
    state: &AppState,
    connection_id: ConnectionId,
    space_id: &str,
    token: Option<&str>,
) {
    let claims = match token {
        Some(token) => state.signer.verify(token, now_ms()),
        None => Err(crate::session::TokenError::Malformed),
    };
    let identity = match claims {
        Ok(claims) => Identity::from_claims(claims),
        Err(err) => {
            warn!(%connection_id, error = %err, "re-authentication failed");
            state
                .effects
                .send_to(connection_id, &ServerMessage::error("Authentication failed"));
            return;
        }
    };

    if let Err(err) = check_ban(state, &identity, space_id).await {
        warn!(%connection_id, user_id = %identity.user_id, "banned user re-authenticated");
        state.directory().evict(connection_id, &err.client_message());
        return;
    }

    let mut inner = state.inner.lock().await;
    let Some(admission) = inner.reauthenticate(connection_id, identity, now_ms()) else {
        return;
    };
    if let Some(previous) = admission.evicted {
        state.directory().evict(previous, EVICTION_NOTICE);
    }
    state
        .directory()
        .rebind(connection_id, &admission.session.user_id);
    drop(inner);

    info!(
        %connection_id,
        user_id = %admission.session.user_id,
        vessel_id = ?admission.session.vessel_id,
        "socket re-authenticated"
    );
    state.effects.route(admission.effects, now_ms());
}

async fn send_frame(socket: &mut WebSocket, payload: &str) -> Result<(), axum::Error> {
    socket.send(Message::Text(payload.to_string().into())).await
}

async fn send_server_message(
    socket: &mut WebSocket,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
