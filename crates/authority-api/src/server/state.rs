#[derive(Clone)]
struct AppState {
    inner: Arc<Mutex<AuthorityRuntime>>,
    effects: EffectRouter,
    collaborators: Collaborators,
    signer: TokenSigner,
    admin_token: Option<String>,
    driver_interval_ms: u64,
}

impl AppState {
    fn new(
        settings: &ServerSettings,
        collaborators: Collaborators,
        effects: EffectRouter,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuthorityRuntime::new(settings.config.clone()))),
            effects,
            collaborators,
            signer: TokenSigner::new(&settings.token_secret),
            admin_token: settings.admin_token.clone(),
            driver_interval_ms: settings.config.driver_interval_ms(),
        }
    }

    fn directory(&self) -> &Arc<ConnectionDirectory> {
        self.effects.directory()
    }
}

/// Loads the space from the store the first time anyone asks for it.
async fn ensure_space(state: &AppState, space_id: &str) -> Result<(), CollaboratorError> {
    if state.inner.lock().await.world().is_space_active(space_id) {
        return Ok(());
    }

    let collaborators = state.collaborators.clone();
    let requested = space_id.to_string();
    let seed = tokio::task::spawn_blocking(move || collaborators.load_seed(&requested))
        .await
        .map_err(|err| CollaboratorError::Unavailable(err.to_string()))??;

    // A concurrent loader may have won; activation is idempotent.
    if state
        .inner
        .lock()
        .await
        .activate_space(space_id, seed, now_ms())
    {
        info!(space_id, "space activated");
    }
    Ok(())
}

/// Checks the ban list off the runtime lock. A failing ban store lets the
/// user in.
async fn check_ban(state: &AppState, identity: &Identity, space_id: &str) -> Result<(), AdmissionError> {
    let bans = state.collaborators.bans.clone();
    let user_id = identity.user_id.clone();
    let username = identity.username.clone();
    let space = space_id.to_string();
    let now = now_ms();
    let outcome =
        tokio::task::spawn_blocking(move || bans.active_ban(&user_id, &username, &space, now))
            .await;
    match outcome {
        Ok(Ok(Some(ban))) => Err(AdmissionError::Banned(ban)),
        Ok(Ok(None)) => Ok(()),
        Ok(Err(err)) => {
            warn!(user_id = %identity.user_id, error = %err, "ban check failed; admitting");
            Ok(())
        }
        Err(err) => {
            warn!(user_id = %identity.user_id, error = %err, "ban check aborted; admitting");
            Ok(())
        }
    }
}

async fn prepare_admission(
    state: &AppState,
    identity: &Identity,
    space_id: &str,
) -> Result<(), AdmissionError> {
    check_ban(state, identity, space_id).await?;
    ensure_space(state, space_id)
        .await
        .map_err(|source| AdmissionError::SpaceUnavailable {
            space_id: space_id.to_string(),
            source,
        })
}
