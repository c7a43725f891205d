//! Live OSRM tests against a Riyadh (GCC states) extract.
//!
//! Needs docker and a prepared dataset; run with `--ignored`.

mod fixtures;

use std::env;

use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, ReuseDirective, TestcontainersError};

use courier_dispatch::engine::DispatchEngine;
use courier_dispatch::model::{DispatchOutcome, DispatchSnapshot, EtaSource};
use courier_dispatch::osrm::{OsrmClient, OsrmConfig};
use courier_dispatch::osrm_data::{GeofabrikRegion, OsrmDataset, OsrmDatasetConfig};
use courier_dispatch::traits::RoutingProvider;
use courier_dispatch::DispatchConfig;

use fixtures::*;

fn osrm_container() -> Result<(Container<GenericImage>, String), TestcontainersError> {
    let data_root = env::var("OSRM_DATA_DIR").unwrap_or_else(|_| "osrm-data".to_string());
    let config = OsrmDatasetConfig::new(GeofabrikRegion::new("asia/gcc-states"), data_root);
    let dataset = OsrmDataset::ensure(&config)
        .map_err(|err| TestcontainersError::other(format!("OSRM prep failed: {}", err)))?;
    let mtime = std::fs::metadata(dataset.osrm_base.with_extension("osrm.partition"))
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(|time| time.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(
            dataset.data_dir.to_string_lossy().to_string(),
            "/data",
        ))
        .with_cmd(vec![
            "osrm-routed".to_string(),
            "--algorithm".to_string(),
            "mld".to_string(),
            dataset.container_osrm_path(),
        ])
        .with_container_name(format!("osrm-gcc-mld-{}", mtime))
        .with_startup_timeout(std::time::Duration::from_secs(60))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;
    Ok((container, format!("http://127.0.0.1:{}", port)))
}

fn client(base_url: String) -> OsrmClient {
    OsrmClient::new(OsrmConfig {
        base_url,
        profile: "car".to_string(),
        timeout_secs: 10,
    })
    .expect("build OSRM client")
}

#[test]
#[ignore = "requires docker and an OSRM dataset"]
fn osrm_table_and_route_have_requested_shape() {
    let (container, base_url) = osrm_container().expect("start OSRM container");
    let osrm = client(base_url);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let origins = [COURIER_A_START.point(), COURIER_B_START.point()];
    let destinations = [SCENARIO_PICKUP.point()];

    // osrm-routed may still be loading; retry briefly.
    let matrix = runtime.block_on(async {
        let start = std::time::Instant::now();
        loop {
            match osrm.get_travel_times(&origins, &destinations, now()).await {
                Ok(matrix) => break Ok(matrix),
                Err(err) if start.elapsed() < std::time::Duration::from_secs(15) => {
                    eprintln!("OSRM not ready: {}", err);
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(err) => break Err(err),
            }
        }
    });
    let matrix = matrix.expect("table request");
    assert!(matrix.has_shape(2, 1));

    let route = runtime
        .block_on(osrm.get_route(
            COURIER_A_START.point(),
            &[SCENARIO_PICKUP.point(), SCENARIO_DROPOFF.point()],
            now(),
            false,
        ))
        .expect("route request");
    assert!(route.has_shape(2));
    assert!(route.polyline.is_some());

    drop(container);
}

#[test]
#[ignore = "requires docker and an OSRM dataset"]
fn engine_assigns_with_real_roads() {
    let (container, base_url) = osrm_container().expect("start OSRM container");
    let engine = DispatchEngine::new(DispatchConfig::default(), client(base_url)).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let snapshot = DispatchSnapshot::new(vec![
        CourierBuilder::new("a", COURIER_A_START).build(),
        CourierBuilder::new("b", COURIER_B_START).build(),
    ]);
    let order = OrderBuilder::new("o-1").build();

    let outcome = runtime
        .block_on(engine.evaluate(&order, &snapshot, now()))
        .expect("valid order");
    match outcome {
        DispatchOutcome::Assigned(result) => {
            assert_eq!(result.pickup_eta_source, EtaSource::Routed);
            assert!(result.plan.total_distance_km > 0.0);
        }
        DispatchOutcome::Unassignable(u) => panic!("unassignable: {:?}", u),
    }

    drop(container);
}
