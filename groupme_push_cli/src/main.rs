//! Smoke-test binary: subscribe to the authenticated user's push channel
//! and log every event until interrupted.

use std::sync::Arc;

use clap::Parser;
use groupme_push::{
    new_push_client, GroupMeApi, PushEvent, PushHandler, PushSubscription,
    RelationsClient,
};

#[derive(Debug, Parser)]
#[command(version, about = "Log GroupMe push events to the terminal")]
struct Arguments {
    /// GroupMe API access token.
    #[arg(short, long, env = "GROUPME_TOKEN")]
    token: String,
}

struct LogHandler;

impl PushHandler for LogHandler {
    fn handle_event(&self, event: PushEvent) {
        match event {
            PushEvent::TextMessage(message) => {
                tracing::info!(
                    chat = %message.chat_id(),
                    sender = %message.sender_id,
                    text = %message.text,
                    "message"
                );
            }
            PushEvent::Like(message) => {
                tracing::info!(chat = %message.chat_id(), id = %message.id, "like");
            }
            PushEvent::Join(group) => tracing::info!(%group, "joined"),
            PushEvent::GroupName { group, name } => {
                tracing::info!(%group, name = %name, "group renamed");
            }
            PushEvent::GroupTopic { group, topic } => {
                tracing::info!(%group, topic = %topic, "topic changed");
            }
            PushEvent::GroupAvatar { group, avatar_url } => {
                tracing::info!(%group, avatar_url = %avatar_url, "group avatar changed");
            }
            PushEvent::LikeIcon {
                group,
                pack_id,
                pack_index,
                kind,
            } => {
                tracing::info!(%group, pack_id, pack_index, kind = %kind, "like icon changed");
            }
            PushEvent::MemberNickname {
                group,
                user,
                nickname,
            } => {
                tracing::info!(%group, %user, nickname = %nickname, "nickname changed");
            }
            PushEvent::MemberAvatar {
                group,
                user,
                avatar_url,
            } => {
                tracing::info!(%group, %user, avatar_url = %avatar_url, "member avatar changed");
            }
            PushEvent::Members {
                group,
                members,
                added,
            } => {
                tracing::info!(%group, count = members.len(), added, "membership changed");
            }
            PushEvent::Error(error) => tracing::error!(%error, "push error"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Arguments::parse();

    let api = Arc::new(GroupMeApi::new(&args.token));
    let user_id = api.self_user_id().await?;
    tracing::info!(%user_id, "resolved authenticated user");

    let push = PushSubscription::new(new_push_client(&args.token), api);
    push.add_handler(Arc::new(LogHandler));
    push.setup().await?;
    push.subscribe_to_user(&user_id).await?;
    tracing::info!("listening for push events, ctrl-c to exit");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    push.close().await;
    Ok(())
}
