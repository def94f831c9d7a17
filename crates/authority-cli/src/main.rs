use std::env;

use authority_api::{serve, token_secret, AuthorityRuntime, Claims, Identity, ServerSettings, TokenSigner};
use authority_core::world::SpaceSeed;
use contracts::messages::{ControlPayload, StationPayload};
use contracts::{ClientMessage, Role, SimulationConfig, Station, DEFAULT_SPACE_ID};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("authority-cli <command>");
    println!("commands:");
    println!("  serve [addr] [config.json]");
    println!("    default addr: 127.0.0.1:8080 (or AUTHORITY_ADDR)");
    println!("  simulate [ticks] [vessels] [config.json]");
    println!("    runs a headless space with scripted crews and prints a summary");
    println!("  mint-token <user_id> <name> [guest|spectator|player|admin] [ttl_secs]");
    println!("    signs a session token with AUTHORITY_TOKEN_SECRET");
}

fn parse_count(value: Option<&String>, label: &str, default: u64) -> Result<u64, String> {
    value
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| format!("invalid {label}: {raw}"))
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

fn parse_role(value: Option<&String>) -> Result<Role, String> {
    match value.map(String::as_str).unwrap_or("player") {
        "guest" => Ok(Role::Guest),
        "spectator" => Ok(Role::Spectator),
        "player" => Ok(Role::Player),
        "admin" => Ok(Role::Admin),
        other => Err(format!("invalid role: {other}")),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn mint_token(args: &[String]) -> Result<(), String> {
    let user_id = args.get(2).cloned().ok_or("missing user_id")?;
    let name = args.get(3).cloned().ok_or("missing name")?;
    let role = parse_role(args.get(4))?;
    let ttl_secs = args
        .get(5)
        .map(|raw| raw.parse::<u64>().map_err(|_| format!("invalid ttl_secs: {raw}")))
        .transpose()?;

    let claims = Claims {
        sub: user_id,
        name,
        roles: vec![role],
        exp: ttl_secs.map(|ttl| now_ms() + ttl * 1_000),
    };
    let token = TokenSigner::new(token_secret())
        .sign(&claims)
        .map_err(|err| format!("failed to sign token: {err}"))?;
    println!("{token}");
    Ok(())
}

fn run_simulation(args: &[String]) -> Result<(), String> {
    let ticks = parse_count(args.get(2), "ticks", 600)?;
    let vessels = parse_count(args.get(3), "vessels", 4)?.max(1);
    let config = match args.get(4) {
        Some(path) => authority_api::load_config_file(path).map_err(|err| err.to_string())?,
        None => SimulationConfig::default(),
    };
    config.validate().map_err(|err| err.to_string())?;

    let space_id = DEFAULT_SPACE_ID;
    let step_ms = config.tuning_for(space_id).tick_interval_ms;
    let mut runtime = AuthorityRuntime::new(config);
    let mut now = 0_u64;
    runtime.activate_space(space_id, SpaceSeed::default(), now);

    let mut rejected = 0_usize;
    for index in 0..vessels {
        let identity = Identity::from_claims(Claims {
            sub: format!("sim_{index}"),
            name: format!("Skipper {index}"),
            roles: vec![Role::Player],
            exp: None,
        });
        let admission = runtime
            .admit(identity, space_id, now)
            .map_err(|err| format!("admission failed: {err}"))?;
        let connection_id = admission.connection_id;

        let commands = [
            ClientMessage::StationClaim(StationPayload {
                station: Station::Helm,
            }),
            ClientMessage::StationClaim(StationPayload {
                station: Station::Engine,
            }),
            ClientMessage::VesselControl(ControlPayload {
                throttle: Some(0.4 + 0.1 * (index % 5) as f64),
                rudder_angle: Some(if index % 2 == 0 { 0.1 } else { -0.1 }),
            }),
        ];
        for command in commands {
            let effects = runtime.handle(connection_id, command, now);
            rejected += effects
                .messages()
                .filter(|(_, message)| matches!(message, contracts::ServerMessage::Error(_)))
                .count();
        }
    }

    let mut incidents = 0_usize;
    let mut charges = 0_usize;
    let mut failures = 0_usize;
    for _ in 0..ticks {
        now += step_ms;
        let report = runtime.tick(now);
        incidents += report.incidents.len();
        charges += report.effects.charges().count();
        failures += report.failures.len();
    }

    let status = runtime
        .status(space_id)
        .ok_or_else(|| format!("space {space_id} vanished"))?;
    info!(ticks, vessels, incidents, charges, failures, rejected, "simulation finished");
    println!(
        "simulated space={} ticks={} vessels={} incidents={} charges={} failures={} rejected_commands={}",
        space_id,
        status.tick_count,
        status.vessels.len(),
        incidents,
        charges,
        failures,
        rejected
    );
    let json = serde_json::to_string_pretty(&status).map_err(|err| err.to_string())?;
    println!("{json}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => {
            match ServerSettings::from_env(
                args.get(2).map(String::as_str),
                args.get(3).map(String::as_str),
            ) {
                Ok(settings) => {
                    println!("serving authority on http://{}", settings.addr);
                    if let Err(err) = serve(settings).await {
                        eprintln!("server error: {err}");
                        std::process::exit(1);
                    }
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    print_usage();
                    std::process::exit(2);
                }
            }
        }
        Some("simulate") => {
            if let Err(err) = run_simulation(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("mint-token") => {
            if let Err(err) = mint_token(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        _ => {
            print_usage();
        }
    }
}
