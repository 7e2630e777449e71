use std::error::Error;

use secrecy::SecretString;
use smallbot_sdk::{handler_fn, HandlerError, SmallBot, SmallBotConfig, TimelineEvent};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smallbot=info".into()),
        )
        .init();

    let access_token = std::env::var("SMALLBOT_ACCESS_TOKEN")
        .unwrap_or_else(|_| "REPLACE_WITH_ACCESS_TOKEN".to_string());
    let homeserver_url = std::env::var("SMALLBOT_HOMESERVER_URL")
        .unwrap_or_else(|_| "https://matrix.org".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = SmallBotConfig::new(SecretString::new(access_token))
            .with_homeserver_url(homeserver_url);

        let handler = handler_fn(
            |client: SmallBot, room_id: String, event: TimelineEvent| async move {
                if !event.is_room_message() || Some(event.sender.as_str()) == client.own_user_id() {
                    return Ok(());
                }
                let body = event.content.body.unwrap_or_default();
                client
                    .send_room_notice(&room_id, &format!("You said: <b>{body}</b>"))
                    .await?;
                Ok::<(), HandlerError>(())
            },
        );

        let bot = SmallBot::new(config, handler)?;
        bot.start().await;

        Ok::<(), Box<dyn Error>>(())
    })
}
