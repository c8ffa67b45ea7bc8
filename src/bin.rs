use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;

use acme::{
    AccountRef, Auth, ChallengeType, Config, DefaultResolver, DefaultTransport, Engine,
    ExternalAccount, Keypair, NewAccount,
};
use clap::{IntoApp, Parser};
use flexi_logger::Logger;
use log::info;

const LETS_ENCRYPT_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

fn parse_challenge_type(s: &str) -> Result<ChallengeType, String> {
    match s {
        "http-01" => Ok(ChallengeType::Http01),
        "dns-01" => Ok(ChallengeType::Dns01),
        other => Err(format!("unsupported challenge type {other:?} (use http-01 or dns-01)")),
    }
}

/// An acme client (RFC8555) written in Rust.
#[derive(Parser, Debug)]
#[clap(version = "0.1.0", author = "Siddhant Ray <siddhant.r98@gmail.com>")]
struct Args {
    /// The email(s) to associate with the ACME account
    #[clap(short, long)]
    email: Vec<String>,
    /// The domain to register the certificate for (repeatable); absent
    /// an explicit --subject, its first occurrence becomes the
    /// certificate subject / CSR common name
    #[clap(short, long)]
    domain: Vec<String>,
    /// The domain that becomes the certificate subject / CSR common
    /// name; must be one of --domain. Defaults to the first --domain.
    #[clap(long)]
    subject: Option<String>,
    /// An optional PEM-encoded account private key; a fresh one is
    /// generated when omitted
    #[clap(long)]
    account_key: Option<String>,
    /// An optional PEM-encoded domain private key the CSR is signed
    /// with; a fresh one is generated when omitted
    #[clap(long)]
    domain_key: Option<String>,
    /// An already-registered account's `kid` URL, to skip registration
    #[clap(long)]
    kid: Option<String>,
    /// External Account Binding key identifier
    #[clap(long, requires = "eab-hmac-key")]
    eab_kid: Option<String>,
    /// External Account Binding base64url HMAC key
    #[clap(long, requires = "eab-kid")]
    eab_hmac_key: Option<String>,
    /// The ACME directory URL
    #[clap(short, long)]
    server: Option<String>,
    /// Use the Let's Encrypt staging directory instead of production
    #[clap(long)]
    staging: bool,
    /// Challenge types to prefer, in order (repeatable)
    #[clap(long = "challenge-type", parse(try_from_str = parse_challenge_type))]
    challenge_types: Vec<ChallengeType>,
    /// Serve the http-01 response ourselves on port 80
    #[clap(long)]
    standalone: bool,
    /// Skip the dry-run challenge self-test
    #[clap(long)]
    skip_challenge_test: bool,
    /// Enables debug output.
    #[clap(short, long)]
    verbose: bool,
}

/// A minimal in-process http-01 responder for `--standalone` runs —
/// serves whatever key authorization was last published for each token,
/// and nothing else.
struct StandaloneServer {
    challenges: Arc<Mutex<HashMap<String, String>>>,
}

impl StandaloneServer {
    fn start() -> Self {
        let challenges: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let handler_state = challenges.clone();

        thread::spawn(move || {
            rouille::start_server("0.0.0.0:80", move |request| {
                rouille::router!(request,
                    (GET) (/.well-known/acme-challenge/{token: String}) => {
                        match handler_state.lock().unwrap().get(&token) {
                            Some(key_authorization) => rouille::Response::text(key_authorization.clone()),
                            None => rouille::Response::empty_404(),
                        }
                    },
                    _ => rouille::Response::empty_404(),
                )
            });
        });

        StandaloneServer { challenges }
    }

    fn publish(&self, token: &str, key_authorization: &str) {
        self.challenges
            .lock()
            .unwrap()
            .insert(token.to_string(), key_authorization.to_string());
    }

    fn unpublish(&self, token: &str) {
        self.challenges.lock().unwrap().remove(token);
    }
}

fn port_80_already_bound() -> bool {
    let addrs: [std::net::SocketAddr; 2] = ["0.0.0.0:80".parse().unwrap(), "127.0.0.1:80".parse().unwrap()];
    TcpStream::connect(&addrs[..]).is_ok()
}

fn load_or_generate_key(path: Option<&str>) -> acme::Result<Keypair> {
    match path {
        Some(path) => {
            let pem = std::fs::read(path)?;
            Keypair::from_pem(&pem)
        }
        None => Keypair::generate_rsa(2048),
    }
}

fn main() {
    let args: Args = Args::parse();
    let mut app = Args::into_app();

    if args.verbose {
        Logger::with_str("info")
            .log_target(flexi_logger::LogTarget::StdOut)
            .start()
            .unwrap_or_else(|e| panic!("Logger initialization failed with {}", e));
    }

    if args.domain.is_empty() {
        app.error(clap::ErrorKind::MissingRequiredArgument, "provide at least one --domain")
            .exit();
    }

    if args.standalone && port_80_already_bound() {
        app.error(
            clap::ErrorKind::DisplayHelp,
            "Error! Provided the standalone option with a process already listening on port 80",
        )
        .exit();
    }

    let account_key = load_or_generate_key(args.account_key.as_deref()).expect("could not load account key");
    let domain_key = load_or_generate_key(args.domain_key.as_deref()).expect("could not generate domain key");

    let directory_url = args
        .server
        .clone()
        .unwrap_or_else(|| {
            if args.staging {
                LETS_ENCRYPT_STAGING.to_owned()
            } else {
                LETS_ENCRYPT_SERVER.to_owned()
            }
        });

    let mut config = Config::new(directory_url);
    config.skip_challenge_test = args.skip_challenge_test;
    config.subject = args.subject.clone();
    if !args.challenge_types.is_empty() {
        config.challenge_types = args.challenge_types.clone();
    } else if args.standalone {
        config.challenge_types = vec![ChallengeType::Http01];
    }

    let engine = Engine::new(
        Box::new(DefaultTransport::new().expect("could not build the HTTP transport")),
        Box::new(DefaultResolver::new().expect("could not build the DNS resolver")),
        config,
    )
    .expect("could not load the ACME directory");

    let standalone_server = args.standalone.then(StandaloneServer::start);

    let account = match args.kid {
        Some(kid) => AccountRef::Existing { kid },
        None => {
            let eab = match (args.eab_kid.as_deref(), args.eab_hmac_key.as_deref()) {
                (Some(id), Some(key)) => Some(ExternalAccount::new(
                    id,
                    base64::decode_config(key, base64::URL_SAFE_NO_PAD).expect("invalid --eab-hmac-key"),
                )),
                _ => None,
            };
            AccountRef::New(NewAccount {
                account_key: &account_key,
                agree_to_terms: &|tos_url: &str| {
                    info!("agreeing to terms of service at {tos_url}");
                    Ok(tos_url.to_string())
                },
                contact: args.email.iter().map(|e| format!("mailto:{e}")).collect(),
                external_account: eab,
            })
        }
    };

    let mut set_challenge = |auth: &Auth| -> acme::Result<()> {
        if let Some(server) = &standalone_server {
            server.publish(&auth.token, &auth.key_authorization);
        } else {
            info!(
                "publish this for {}: place {:?} at the well-known http-01 path, or {:?} as a TXT record at {}",
                auth.altname, auth.key_authorization, auth.dns_authorization, auth.dns_host
            );
        }
        Ok(())
    };

    let mut remove_challenge = |auth: &Auth| -> acme::Result<()> {
        if let Some(server) = &standalone_server {
            server.unpublish(&auth.token);
        }
        Ok(())
    };

    let bundle = acme::obtain(
        &engine,
        &account_key,
        account,
        &args.domain,
        &domain_key,
        &mut set_challenge,
        &mut remove_challenge,
    )
    .expect("certificate issuance failed");

    std::fs::write("domain.key", &bundle.private_key_pem).expect("could not write domain.key");
    std::fs::write("cert.pem", bundle.leaf.as_bytes()).expect("could not write cert.pem");
    std::fs::write("chain.pem", bundle.chain.as_bytes()).expect("could not write chain.pem");

    if args.account_key.is_none() {
        std::fs::write("account.key", account_key.private_pem().unwrap_or_default())
            .expect("could not write account.key");
    }

    info!("certificate issued for {:?}", args.domain);
}
