mod common;

use anyhow::Result;
use common::FixtureServer;
use eurostat_etl::config::{FetchConfig, FetchPolicy};
use eurostat_etl::error::EtlError;
use eurostat_etl::fetch::{FetchOutcome, Fetcher};
use std::fs;
use tempfile::tempdir;
use url::Url;

fn fetcher() -> Result<Fetcher> {
    Ok(Fetcher::new(&FetchConfig {
        timeout_secs: 5,
        use_system_proxy: false,
        ..FetchConfig::default()
    })?)
}

#[test]
fn skip_existing_performs_one_request() -> Result<()> {
    let server = FixtureServer::start();
    let url = Url::parse(&server.route("/data/ten00124", 200, common::ENERGY_TSV))?;
    let temp = tempdir()?;
    let dest = temp.path().join("raw/final_energy_consumption_by_sector.tsv");
    let fetcher = fetcher()?;

    let first = fetcher.fetch(&url, &dest, FetchPolicy::SkipExisting)?;
    let second = fetcher.fetch(&url, &dest, FetchPolicy::SkipExisting)?;

    assert!(first.was_downloaded());
    assert_eq!(second, FetchOutcome::Skipped);
    assert_eq!(server.hits("/data/ten00124"), 1);
    assert_eq!(fs::read_to_string(&dest)?, common::ENERGY_TSV);

    Ok(())
}

#[test]
fn overwrite_requests_every_time() -> Result<()> {
    let server = FixtureServer::start();
    let url = Url::parse(&server.route("/data/sdg_13_10", 200, "a\tb\n1\t2\n"))?;
    let temp = tempdir()?;
    let dest = temp.path().join("net_greenhouse_gas_emissions.tsv");
    let fetcher = fetcher()?;

    fetcher.fetch(&url, &dest, FetchPolicy::Overwrite)?;
    server.route("/data/sdg_13_10", 200, "a\tb\n3\t4\n");
    let second = fetcher.fetch(&url, &dest, FetchPolicy::Overwrite)?;

    assert_eq!(server.hits("/data/sdg_13_10"), 2);
    assert_eq!(fs::read_to_string(&dest)?, "a\tb\n3\t4\n");
    match second {
        FetchOutcome::Downloaded { bytes, sha256 } => {
            assert_eq!(bytes, 8);
            assert_eq!(sha256.len(), 64);
        }
        FetchOutcome::Skipped => panic!("overwrite policy must not skip"),
    }

    Ok(())
}

#[test]
fn not_found_is_a_transfer_error_and_writes_nothing() -> Result<()> {
    let server = FixtureServer::start();
    let url = Url::parse(&server.route("/data/missing", 404, "no such dataset"))?;
    let temp = tempdir()?;
    let dest = temp.path().join("missing.tsv");

    let err = fetcher()?
        .fetch(&url, &dest, FetchPolicy::Overwrite)
        .unwrap_err();

    match &err {
        EtlError::Transfer { status, url: failed, .. } => {
            assert_eq!(*status, Some(404));
            assert!(failed.ends_with("/data/missing"));
        }
        other => panic!("expected transfer error, got {other:?}"),
    }
    assert_eq!(err.stage(), "fetch");
    assert!(!dest.exists());

    Ok(())
}

#[test]
fn unreachable_host_is_a_transfer_error() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let url = Url::parse(&format!("http://127.0.0.1:{port}/data"))?;
    let temp = tempdir()?;
    let dest = temp.path().join("data.tsv");

    let err = fetcher()?
        .fetch(&url, &dest, FetchPolicy::Overwrite)
        .unwrap_err();
    assert!(matches!(err, EtlError::Transfer { status: None, .. }));
    assert!(!dest.exists());

    Ok(())
}
