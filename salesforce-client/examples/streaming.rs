use salesforce_client::client::{self, AuthFlow, Credentials, Environment};
use salesforce_client::streaming::{topic, Config, DispatchMode, Message, StreamingSession};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Username-Password flow; the security token is appended to the password.
    let client = client::Builder::new()
        .credentials(Credentials {
            client_id: env::var("SALESFORCE_CLIENT_ID")
                .expect("SALESFORCE_CLIENT_ID environment variable not set"),
            client_secret: Some(
                env::var("SALESFORCE_CLIENT_SECRET")
                    .expect("SALESFORCE_CLIENT_SECRET environment variable not set"),
            ),
            username: Some(
                env::var("SALESFORCE_USERNAME")
                    .expect("SALESFORCE_USERNAME environment variable not set"),
            ),
            password: Some(
                env::var("SALESFORCE_PASSWORD")
                    .expect("SALESFORCE_PASSWORD environment variable not set"),
            ),
            security_token: env::var("SALESFORCE_SECURITY_TOKEN").ok(),
            refresh_token: None,
            login_uri: env::var("SALESFORCE_LOGIN_URI").ok(),
            environment: if env::var("SALESFORCE_SANDBOX").is_ok() {
                Environment::Sandbox
            } else {
                Environment::Production
            },
        })
        .auth_flow(AuthFlow::Password)
        .build()?
        .connect()
        .await?;

    info!("Client connected successfully");

    // REST calls recover from an expired session once on their own.
    let limits: Option<serde_json::Value> = client.get(&client.data_path("/limits"), &[]).await?;
    if let Some(limits) = limits {
        info!("Daily API requests: {}", limits["DailyApiRequests"]);
    }

    let mut session = StreamingSession::start(
        &client,
        Config {
            dispatch_mode: DispatchMode::Message,
            ..Default::default()
        },
    )
    .await?;

    info!("Streaming session started: {:?}", session.client_id());

    let push_topic = env::var("SALESFORCE_PUSH_TOPIC").unwrap_or_else(|_| "AccountUpdates".to_string());
    let channel = session
        .subscribe(topic::PUSH_TOPIC, &push_topic, |messages: &[Message]| {
            for message in messages {
                info!("Event on {}: {:?}", message.channel, message.data);
            }
        })
        .await?;
    info!("Subscribed to {channel}");

    session
        .subscribe(topic::CDC, "Account", |messages: &[Message]| {
            for message in messages {
                info!("Change event: {:?}", message.data);
            }
        })
        .await?;

    let mut errors = session.errors().ok_or("error channel already taken")?;

    tokio::select! {
        Some(err) = errors.recv() => error!("Streaming stopped: {err}"),
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    session.disconnect().await?;

    Ok(())
}
