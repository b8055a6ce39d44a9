//! batata-upstream: resolve registry services into upstream dial targets

mod logging;
mod settings;

use std::time::Duration;

use batata_upstream::{NacosClientFactory, RouteConfig, UpstreamApp, UpstreamError};
use clap::Parser;
use tracing::{error, info, warn};

use crate::logging::{LoggingConfig, init_logging};
use crate::settings::{Cli, Command, UpstreamConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = UpstreamConfig::load(&cli)?;
    let _logging_guard = init_logging(&LoggingConfig::from_settings(&config.logging))?;

    info!(
        server = %config.registry.ip_addr,
        port = config.registry.port,
        namespaces = ?config.registry.effective_namespaces(),
        "Starting batata-upstream"
    );

    let app = UpstreamApp::start(config.registry.clone(), &NacosClientFactory).await?;

    let outcome = match cli.command {
        Command::Resolve {
            service,
            group,
            namespace,
            clusters,
        } => {
            let route = RouteConfig::new(&service)
                .with_group(&group)
                .with_namespace(&namespace)
                .with_clusters(clusters);
            resolve_route(&app, route).await
        }
        Command::Routes => resolve_routes(&app, &config.routes).await,
        Command::Watch { interval } => watch(&app, &config.routes, interval).await,
    };

    app.stop().await?;
    outcome
}

async fn resolve_route(app: &UpstreamApp, route: RouteConfig) -> anyhow::Result<()> {
    let resolver = app.resolver(route);
    let upstreams = resolver.resolve().await?;
    for upstream in upstreams {
        println!("{}", upstream);
    }
    Ok(())
}

async fn resolve_routes(app: &UpstreamApp, routes: &[RouteConfig]) -> anyhow::Result<()> {
    if routes.is_empty() {
        anyhow::bail!("no routes configured");
    }

    let mut failed = 0;
    for route in routes {
        let name = route.display_name().to_string();
        match app.resolver(route.clone()).resolve().await {
            Ok(upstreams) => {
                let dials: Vec<String> = upstreams.iter().map(ToString::to_string).collect();
                println!("{}\t{}", name, dials.join(","));
            }
            Err(e) => {
                failed += 1;
                report_failure(&name, &e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} routes failed to resolve", failed, routes.len());
    }
    Ok(())
}

async fn watch(app: &UpstreamApp, routes: &[RouteConfig], interval: u64) -> anyhow::Result<()> {
    if routes.is_empty() {
        anyhow::bail!("no routes configured");
    }

    let resolvers: Vec<_> = routes.iter().cloned().map(|r| app.resolver(r)).collect();
    let interval = Duration::from_secs(interval.max(1));

    loop {
        for resolver in &resolvers {
            let name = resolver.route().display_name();
            match resolver.resolve().await {
                Ok(upstreams) => {
                    let dials: Vec<String> = upstreams.iter().map(ToString::to_string).collect();
                    println!("{}\t{}", name, dials.join(","));
                }
                Err(e) => report_failure(name, &e),
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn report_failure(name: &str, err: &UpstreamError) {
    if err.is_empty_result() {
        warn!(route = %name, "No healthy instances");
    } else {
        error!(route = %name, error = %err, "Failed to resolve route");
    }
}
