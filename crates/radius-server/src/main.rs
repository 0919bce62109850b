// SPDX-License-Identifier: AGPL-3.0-only
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use isp_radius::accounting::AcctHandler;
use isp_radius::api::{serve_api, ApiState, RbacConfig};
use isp_radius::auth::AuthHandler;
use isp_radius::config::{Args, LogFormat};
use isp_radius::control::SessionControl;
use isp_radius::http::{serve_http, ServerState};
use isp_radius::model::Nas;
use isp_radius::presence::{PresenceBroadcaster, PresenceEvent};
use isp_radius::secrets::SecretResolver;
use isp_radius::server::{bind, serve_acct, serve_auth, RadiusContext};
use isp_radius::sessions::SessionRegistry;
use isp_radius::store::{MemoryStore, PgStore, Store};
use isp_radius::sweep::ExpirySweep;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

async fn open_store(args: &Args) -> Result<Arc<dyn Store>> {
    if let Some(url) = args.database_url.as_deref() {
        let store = PgStore::connect(url).await?;
        store.migrate().await?;
        info!("connected to PostgreSQL store");
        return Ok(Arc::new(store));
    }

    warn!("DATABASE_URL not set; using in-memory store");
    let store = MemoryStore::new();
    for (ip, secret) in &args.nas_secret {
        store
            .insert_nas(Nas {
                id: Uuid::new_v4(),
                tenant_id: Uuid::nil(),
                name: ip.to_string(),
                ip: *ip,
                secret: secret.clone(),
                active: true,
            })
            .await;
    }
    Ok(Arc::new(store))
}

/// Logs presence transitions; stands in for the dashboard push channel.
async fn log_presence(presence: Arc<PresenceBroadcaster>) {
    let mut events = presence.subscribe();
    loop {
        match events.recv().await {
            Ok(PresenceEvent::Online {
                tenant_id,
                customer_id,
                username,
                ip,
            }) => info!(
                tenant = %tenant_id,
                customer = %customer_id,
                user = %username,
                ip = ?ip,
                "customer online"
            ),
            Ok(PresenceEvent::Offline {
                tenant_id,
                customer_id,
                username,
            }) => info!(
                tenant = %tenant_id,
                customer = %customer_id,
                user = %username,
                "customer offline"
            ),
            Err(RecvError::Lagged(missed)) => warn!(missed, "presence logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format)?;
    args.validate().map_err(|e| anyhow!(e))?;

    let store = open_store(&args).await?;
    let registry = Arc::new(SessionRegistry::new());
    let presence = Arc::new(PresenceBroadcaster::default());

    let ctx = Arc::new(RadiusContext {
        resolver: SecretResolver::new(store.clone())
            .with_default_secret(args.default_secret.clone().into_bytes())
            .with_fallback(!args.disable_nas_fallback),
        auth: AuthHandler::new(store.clone(), registry.clone()),
        acct: AcctHandler::new(store.clone(), registry.clone(), presence.clone()),
    });
    let control = Arc::new(SessionControl::new(store.clone(), registry.clone(), presence.clone()));
    let sweep = Arc::new(ExpirySweep::new(store.clone(), registry.clone(), control.clone()));
    let state = ServerState::new(registry.clone());

    let mut handles = Vec::new();
    handles.push(tokio::spawn(log_presence(presence.clone())));

    if let Some(addr) = args.listen_http {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_http(addr, state).await {
                error!(error = %err, "HTTP listener stopped");
            }
        }));
    }

    if let Some(addr) = args.listen_api {
        let path = args
            .rbac_config
            .as_ref()
            .context("--rbac-config is required when --listen-api is set")?;
        let rbac = RbacConfig::from_file(path)?;
        let api_state = ApiState::new(registry.clone(), control.clone(), sweep.clone());
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_api(addr, rbac, api_state).await {
                error!(error = %err, "management API stopped");
            }
        }));
    }

    if args.expiry_sweep_secs > 0 {
        let period = Duration::from_secs(args.expiry_sweep_secs);
        info!(period_secs = args.expiry_sweep_secs, "voucher expiry sweep enabled");
        handles.push(tokio::spawn(sweep.clone().run(period)));
    } else {
        warn!("voucher expiry sweep disabled");
    }

    let auth_socket = bind(args.listen_auth, "auth").await?;
    let acct_socket = bind(args.listen_acct, "acct").await?;
    {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_auth(auth_socket, ctx).await {
                error!(error = %err, "auth listener stopped");
            }
        }));
    }
    {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = serve_acct(acct_socket, ctx).await {
                error!(error = %err, "accounting listener stopped");
            }
        }));
    }
    state.set_ready(true);

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!(active_sessions = registry.len().await, "shutdown requested");
    state.set_ready(false);
    state.set_alive(false);
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
