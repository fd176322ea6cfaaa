use std::process::ExitCode;
use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use steam_ban_checker::chat::{ChatPort, SerenityChat};
use steam_ban_checker::checker::{BanChecker, Dispatcher, Scheduler};
use steam_ban_checker::config::{BotConfig, LogConfig};
use steam_ban_checker::groups::GroupDirectory;
use steam_ban_checker::ingest::Ingestor;
use steam_ban_checker::lookup::{LookupGateway, SteamWebApi};
use steam_ban_checker::store::{DEFAULT_COMMAND_PREFIX, SqliteStore, TrackedEntityStore};
use steam_ban_checker::{Data, ERROR_TARGET, Error, commands, handlers, logging};
use tracing::{error, info};

/// Main function to run the bot
async fn async_main(config: BotConfig) -> Result<(), Error> {
    info!(config = ?config, "Starting Steam ban checker");

    let store: Arc<dyn TrackedEntityStore> = Arc::new(SqliteStore::open(&config.database).await?);

    let steam = SteamWebApi::new(config.steam_token.clone(), config.lookup_timeout)?;
    steam.validate_key().await?;
    info!("Steam API key accepted");
    let gateway = LookupGateway::new(
        Arc::new(steam),
        config.lookup_workers,
        config.lookup_timeout,
    );

    // The checker posts notices outside of any event, so it gets its own HTTP client
    let http = Arc::new(serenity::Http::new(&config.discord_token));
    let current_user = http.get_current_user().await?;
    let chat: Arc<dyn ChatPort> = Arc::new(SerenityChat::new(Arc::clone(&http), current_user.id));

    let dispatcher = Dispatcher::new(Arc::clone(&chat), Arc::clone(&store));
    let checker = Arc::new(BanChecker::new(
        gateway,
        Arc::clone(&store),
        dispatcher,
        config.checks_per_day,
    ));
    let groups = Arc::new(GroupDirectory::new(Arc::clone(&store)));
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&checker),
        Arc::clone(&groups),
        chat,
    ));
    let scheduler = Scheduler::spawn(Arc::clone(&checker), config.checks_per_day);

    let data = Data::new(checker, groups, ingestor, scheduler.sender());
    let framework_data = data.clone();

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(DEFAULT_COMMAND_PREFIX.to_string()),
                dynamic_prefix: Some(|ctx| {
                    Box::pin(async move {
                        Ok(ctx
                            .data
                            .command_prefix(ctx.guild_id.map(serenity::GuildId::get))
                            .await)
                    })
                }),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx).await;
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx).await;
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    // Replies to the user for argument and check failures
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!(target: ERROR_TARGET, "Error while handling error: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands globally");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    // Configure the Serenity client
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .type_map_insert::<Data>(data)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);

    info!("Starting bot...");
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!(target: ERROR_TARGET, "Client stopped with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn main() -> ExitCode {
    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let log_config = match LogConfig::load(config.logging_config.as_deref()) {
        Ok(log_config) => log_config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init(&log_config) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(target: ERROR_TARGET, "Failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: ERROR_TARGET, "Error: {err}");
            ExitCode::FAILURE
        }
    }
}
