use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backstage_operator::health;
use backstage_operator::{
    Context, HealthState, KubeClusterClient, ManifestBundle, OperatorConfig, PlatformDefaults,
    ReadinessCheck, platform, run_controller,
};

type BoxError = Box<dyn std::error::Error>;

const LEASE_NAME: &str = "backstage-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time in-flight passes get to finish after a shutdown signal
const DRAIN_PERIOD: Duration = Duration::from_secs(5);

/// Name and namespace of the operator pod, used as the lease holder
struct PodIdentity {
    name: String,
    namespace: String,
}

impl PodIdentity {
    fn from_env() -> Self {
        let name = std::env::var("POD_NAME").unwrap_or_else(|_| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "backstage-operator".to_string());
            warn!(holder = %host, "POD_NAME unset, falling back to the hostname");
            host
        });
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE unset, holding the lease in 'default'");
            "default".to_string()
        });
        Self { name, namespace }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    install_crypto_provider()?;
    init_tracing()?;

    let health_state = Arc::new(HealthState::new());
    let health_server = tokio::spawn(health::serve(health_state.clone()));

    let config = OperatorConfig::from_env()?;
    let bundle = ManifestBundle::load(config.default_config_dir.as_deref())?;
    health_state.pass(ReadinessCheck::Manifests);
    info!(
        source = ?config.default_config_dir,
        "Base manifests loaded"
    );

    let client = Client::try_default().await?;
    let detected = match config.platform {
        Some(platform) => platform,
        None => platform::detect(&client).await,
    };
    let platform_defaults =
        PlatformDefaults::resolve(detected).with_pull_secrets(config.default_pull_secrets.clone());
    health_state.pass(ReadinessCheck::Platform);
    info!(platform = %detected, exposure = ?platform_defaults.exposure_kind, "Platform resolved");

    let identity = PodIdentity::from_env();
    let lease = LeaseLock::new(
        client.clone(),
        &identity.namespace,
        LeaseLockParams {
            holder_id: identity.name.clone(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    );
    acquire_leadership(&lease, &identity).await;
    let lease_keeper = tokio::spawn(hold_leadership(lease));

    let watch_namespace = config.watch_namespace.clone();
    let ctx = Arc::new(Context::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        config,
        bundle,
        platform_defaults,
        Some(health_state.clone()),
    ));
    let controller = tokio::spawn(async move {
        run_controller(client, ctx, watch_namespace.as_deref()).await;
    });

    tokio::select! {
        result = controller => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_server => {
            match result {
                Ok(Err(e)) => error!(address = health::HEALTH_ADDR, error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        result = lease_keeper => {
            let reason = result.unwrap_or_else(|e| format!("lease task panicked: {e}"));
            error!(%reason, "Leadership lost");
            // Kubernetes restarts the pod, which then rejoins the election
            return Err(reason.into());
        }
        result = shutdown_signal() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signals");
            }
            health_state.withdraw(ReadinessCheck::Controller);
            info!(drain = ?DRAIN_PERIOD, "Shutdown requested, draining in-flight passes");
            tokio::time::sleep(DRAIN_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn install_crypto_provider() -> Result<(), BoxError> {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if !installed && rustls::crypto::CryptoProvider::get_default().is_none() {
        return Err("no rustls crypto provider available".into());
    }
    Ok(())
}

fn init_tracing() -> Result<(), BoxError> {
    let filter = EnvFilter::from_default_env()
        .add_directive("backstage_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Block until this pod holds the lease
async fn acquire_leadership(lease: &LeaseLock, identity: &PodIdentity) {
    info!(
        holder = %identity.name,
        namespace = %identity.namespace,
        lease = LEASE_NAME,
        "Waiting for leadership"
    );
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another replica holds the lease"),
            Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease until it is lost, returning why
async fn hold_leadership(lease: LeaseLock) -> String {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => return "another replica took the lease".to_string(),
            Err(e) => return format!("lease renewal failed: {e}"),
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await
}
