use clap::Parser;
use portal_auth::cli::{
    Args, build_config, handle_create_admin, init_logging, load_token_secrets, open_database,
    validate_origin,
};
use portal_auth::{init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(secrets) = load_token_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(origin) = validate_origin(&args.origin) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(login) = args.create_admin.as_deref() {
        if !handle_create_admin(&db, login).await {
            std::process::exit(1);
        }
    }

    init_cleanup(&db).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, origin = %origin, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let config = build_config(
        db,
        &origin,
        secrets,
        args.access_token_ttl,
        args.ip_header,
        args.login_attempts_per_minute,
    );

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
