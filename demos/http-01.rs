//! Issues a certificate over `http-01`, serving challenge files with a temporary Actix Web server.
//!
//! Expects `account.pem` and `server.pem` private keys (PKCS #8, SEC1 or PKCS #1) in the working
//! directory, e.g. from `openssl ecparam -genkey -name prime256v1 -noout`.

use std::{fs, path::PathBuf};

use acme::{
    codec::keys::import_pem, AccountOptions, AgreeToTerms, BoxError, CancelToken,
    CertificateRequest, ChallengeKind, Directory, DirectoryUrl, EnrichedChallenge, Presenter,
};
use actix_files::Files;
use actix_web::{App, HttpServer};
use async_trait::async_trait;

const PRIMARY_NAME: &str = "example.org";
const CHALLENGE_DIR: &str = "acme-challenge";

/// Writes each key authorization to `<dir>/<token>`.
struct FilePresenter {
    dir: PathBuf,
}

impl FilePresenter {
    fn path(&self, challenge: &EnrichedChallenge) -> PathBuf {
        self.dir.join(&challenge.token)
    }
}

#[async_trait]
impl Presenter for FilePresenter {
    async fn set(&self, challenge: &EnrichedChallenge) -> Result<(), BoxError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(challenge), &challenge.key_authorization)?;
        Ok(())
    }

    async fn remove(&self, challenge: &EnrichedChallenge) -> Result<(), BoxError> {
        fs::remove_file(self.path(challenge))?;
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    // Use `DirectoryUrl::LetsEncrypt` for production uses.
    let url = DirectoryUrl::LetsEncryptStaging;

    // Create temporary Actix Web server for ACME challenge.
    let srv = HttpServer::new(|| {
        App::new().service(Files::new("/.well-known/acme-challenge", CHALLENGE_DIR))
    })
    .bind(("0.0.0.0", 80))?
    .shutdown_timeout(0)
    .run();

    let srv_handle = srv.handle();
    let srv_task = actix_web::rt::spawn(srv);

    let account_key = import_pem(&fs::read_to_string("account.pem")?)?;
    let server_key = import_pem(&fs::read_to_string("server.pem")?)?;

    let dir = Directory::fetch(url).await?;

    // Agreeing blindly is fine for a demo. Real callers should show the terms URL to a human.
    let acc = dir
        .account(
            AccountOptions::new(account_key)
                .email("foo@bar.com")
                .agree_to_terms(AgreeToTerms::Accept),
        )
        .await?;

    // Store this to skip registration next time.
    println!("account: {}", acc.key_id());

    let presenter = FilePresenter {
        dir: PathBuf::from(CHALLENGE_DIR),
    };

    let request = CertificateRequest::new([PRIMARY_NAME], server_key)
        .presenter(ChallengeKind::Http01, presenter);

    // Self-test, order, present, validate, finalize and download in one go.
    let cert = acc.issue(request, &CancelToken::new()).await?;
    println!("{}", cert.fullchain());

    // Stop temporary server for ACME challenge
    srv_handle.stop(true).await;
    srv_task.await??;

    // Delete acme-challenge dir
    fs::remove_dir_all(CHALLENGE_DIR).ok();

    Ok(())
}
