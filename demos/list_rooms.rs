use std::error::Error;

use secrecy::SecretString;
use smallbot_sdk::{handler_fn, HandlerError, SmallBot, SmallBotConfig, TimelineEvent};

fn main() -> Result<(), Box<dyn Error>> {
    let access_token = std::env::var("SMALLBOT_ACCESS_TOKEN")
        .unwrap_or_else(|_| "REPLACE_WITH_ACCESS_TOKEN".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = SmallBotConfig::new(SecretString::new(access_token));
        let bot = SmallBot::new(
            config,
            handler_fn(|_: SmallBot, _: String, _: TimelineEvent| async {
                Ok::<(), HandlerError>(())
            }),
        )?;

        let me = bot.whoami().await?;
        println!("logged in as {}", me.user_id);

        for room_id in bot.joined_rooms().await?.joined_rooms {
            let name = match bot.get_room_state_name(&room_id).await {
                Ok(state) => state.name,
                Err(err) if err.errcode() == Some("M_NOT_FOUND") => "<unnamed>".to_string(),
                Err(err) => return Err(err.into()),
            };
            println!("{room_id} {name}");
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
