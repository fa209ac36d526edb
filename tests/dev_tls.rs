#![cfg(feature = "dev-tls")]

use std::path::PathBuf;
use std::time::Duration;

use keycloak_session::{DevCaTrust, Development, Environment, Error};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn development() -> Development {
    Environment::Development
        .development()
        .expect("development guard")
}

fn leaf(name: &str) -> CertificateDer<'static> {
    CertificateDer::from_pem_file(fixture(name)).unwrap()
}

fn verify(trust: &DevCaTrust, cert: &CertificateDer<'_>, host: &str) -> Result<(), rustls::Error> {
    let server_name = ServerName::try_from(host.to_string()).unwrap();
    trust
        .verifier()
        .verify_server_cert(cert, &[], &server_name, &[], UnixTime::now())
        .map(|_| ())
}

#[test]
fn guard_only_exists_in_development() {
    assert!(Environment::Production.development().is_none());
    assert!(Environment::Staging.development().is_none());
    assert!(Environment::Development.development().is_some());
}

#[test]
fn missing_ca_file_is_reported() {
    let path = fixture("does-not-exist.pem");

    let err = DevCaTrust::load(&development(), &path).err().unwrap();

    assert!(matches!(err, Error::CaNotFound(p) if p == path));
}

#[test]
fn non_pem_file_is_a_tls_error() {
    let err = DevCaTrust::load(&development(), fixture("jwks.json"))
        .err()
        .unwrap();

    assert!(matches!(err, Error::Tls(_)));
}

#[test]
fn certificate_issued_by_dev_ca_is_trusted() {
    let trust = DevCaTrust::load(&development(), fixture("dev-ca.pem")).unwrap();

    verify(&trust, &leaf("keycloak-dev.pem"), "keycloak.dev.local").unwrap();
}

#[test]
fn dev_ca_does_not_excuse_hostname_mismatch() {
    let trust = DevCaTrust::load(&development(), fixture("dev-ca.pem")).unwrap();

    assert!(verify(&trust, &leaf("keycloak-dev.pem"), "evil.example").is_err());
}

#[test]
fn certificate_from_unrelated_ca_is_refused() {
    let trust = DevCaTrust::load(&development(), fixture("dev-ca.pem")).unwrap();

    assert!(verify(&trust, &leaf("stranger.pem"), "keycloak.dev.local").is_err());
}

#[test]
fn other_root_does_not_trust_dev_leaf() {
    let trust = DevCaTrust::load(&development(), fixture("other-ca.pem")).unwrap();

    assert!(verify(&trust, &leaf("keycloak-dev.pem"), "keycloak.dev.local").is_err());
    verify(&trust, &leaf("stranger.pem"), "keycloak.dev.local").unwrap();
}

#[test]
fn backchannel_client_builds() {
    let trust = DevCaTrust::load(&development(), fixture("dev-ca.pem")).unwrap();

    assert!(trust.client_config().is_ok());
    assert!(trust.http_client(Duration::from_secs(5)).is_ok());
}
