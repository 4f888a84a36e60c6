use crate::generator::profile::GeneratorConfig;
use crate::http_bridge::model::{ErrorBody, IngestSummary};
use crate::workflow::runner::Runner;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::{http::StatusCode, Filter};

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn with_runner(
    runner: Arc<Runner>,
) -> impl Filter<Extract = (Arc<Runner>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || Arc::clone(&runner))
}

/// HTTP front end over the engine: snapshots, counters and generated scans.
pub struct HttpBridge;

impl HttpBridge {
    pub fn routes(
        runner: Arc<Runner>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let snapshot_route = warp::path!("snapshot" / String)
            .and(warp::get())
            .and(with_runner(Arc::clone(&runner)))
            .map(|station: String, runner: Arc<Runner>| {
                match runner.engine().snapshot(&station.to_uppercase()) {
                    Some(snapshot) => {
                        warp::reply::with_status(warp::reply::json(&*snapshot), StatusCode::OK)
                    }
                    None => warp::reply::with_status(
                        warp::reply::json(&ErrorBody::new(format!("no scans for {}", station))),
                        StatusCode::NOT_FOUND,
                    ),
                }
            });

        let metrics_route = warp::path!("metrics")
            .and(warp::get())
            .and(with_runner(Arc::clone(&runner)))
            .map(|runner: Arc<Runner>| warp::reply::json(&runner.engine().metrics()));

        let generator_route = warp::path!("ingest-config")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_runner(runner))
            .and_then(|config: GeneratorConfig, runner: Arc<Runner>| async move {
                let reply = match runner.ingest(&config).await {
                    Ok(report) => {
                        if let Some(name) = config.scenario.as_ref() {
                            info!(
                                "scenario {} -> {} cells on {}",
                                name,
                                report.snapshot.cells.len(),
                                report.station
                            );
                        }
                        let summary = IngestSummary::from_report(&report, config.description.as_deref());
                        warp::reply::with_status(warp::reply::json(&summary), StatusCode::OK)
                    }
                    Err(err) => {
                        warn!("ingest-config error: {:#}", err);
                        warp::reply::with_status(
                            warp::reply::json(&ErrorBody::new(format!("{:#}", err))),
                            StatusCode::UNPROCESSABLE_ENTITY,
                        )
                    }
                };
                Ok::<_, warp::Rejection>(reply)
            });

        snapshot_route.or(metrics_route).or(generator_route)
    }

    pub async fn serve(runner: Arc<Runner>, address: SocketAddr) {
        info!("HTTP bridge listening on {}", address);
        warp::serve(Self::routes(runner)).run(address).await;
    }
}
