use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wikibot_core::client::{
    EditOptions, ListOptions, MoveOptions, NS_MAIN, UploadOptions, WikiClient,
};
use wikibot_core::config::{ClientConfig, DEFAULT_CONFIG_FILENAME, derive_wiki_url, load_config};
use wikibot_core::response::ApiResponse;

#[derive(Debug, Parser)]
#[command(
    name = "wikibot",
    version,
    about = "Bot client for MediaWiki-family wikis"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PREFIX", help = "Wiki site prefix")]
    site: Option<String>,
    #[arg(long, global = true, value_name = "URL", help = "Full api.php endpoint")]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Log in with WIKI_USERNAME / WIKI_PASSWORD")]
    Login,
    #[command(about = "Print the current wikitext of a page")]
    Get(GetArgs),
    Edit(EditArgs),
    Delete(DeleteArgs),
    Move(MoveArgs),
    Undelete(DeleteArgs),
    Purge(PurgeArgs),
    Upload(UploadArgs),
    List(ListArgs),
    #[command(about = "Run a Semantic MediaWiki query")]
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct GetArgs {
    title: String,
}

#[derive(Debug, Args)]
struct EditArgs {
    title: String,
    #[arg(long, value_name = "PATH", help = "Read page text from a file (stdin text otherwise)")]
    file: Option<PathBuf>,
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,
    #[arg(long, default_value = "Bot edit")]
    summary: String,
    #[arg(long, help = "Do not flag the edit as a bot edit")]
    no_bot: bool,
    #[arg(long, help = "Skip when the cached content is identical")]
    skip_unchanged: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    title: String,
    #[arg(long, default_value = "")]
    reason: String,
}

#[derive(Debug, Args)]
struct MoveArgs {
    from: String,
    to: String,
    #[arg(long, default_value = "")]
    reason: String,
    #[arg(long, help = "Do not leave a redirect behind")]
    no_redirect: bool,
    #[arg(long, help = "Leave the talk page in place")]
    no_talk: bool,
    #[arg(long, help = "Move subpages too")]
    subpages: bool,
}

#[derive(Debug, Args)]
struct PurgeArgs {
    #[arg(required = true)]
    titles: Vec<String>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    path: PathBuf,
    #[arg(long, help = "Target file name (defaults to the local file name)")]
    filename: Option<String>,
    #[arg(long, default_value = "")]
    comment: String,
    #[arg(long, default_value = "")]
    text: String,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(short = 'n', long, default_value_t = NS_MAIN)]
    namespace: i32,
    #[arg(short = 'c', long, value_name = "NAME", help = "List category members")]
    category: Option<String>,
    #[arg(long, conflicts_with = "category", help = "List redirects only")]
    redirects: bool,
    #[arg(long, default_value_t = 500)]
    limit: usize,
    #[arg(long = "continue", value_name = "TOKEN")]
    continue_from: Option<String>,
}

#[derive(Debug, Args)]
struct AskArgs {
    query: String,
    #[arg(long, default_value_t = 500)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };
    let client = build_client(cli.config, cli.site, cli.api_url)?;

    match command {
        Commands::Login => run_login(&client),
        Commands::Get(args) => run_get(&client, args),
        Commands::Edit(args) => run_edit(&client, args),
        Commands::Delete(args) => {
            ensure_login(&client)?;
            report(client.delete_page(&args.title, &args.reason)?)
        }
        Commands::Move(args) => run_move(&client, args),
        Commands::Undelete(args) => {
            ensure_login(&client)?;
            report(client.undelete_page(&args.title, &args.reason)?)
        }
        Commands::Purge(args) => report(client.purge_pages(&args.titles)?),
        Commands::Upload(args) => run_upload(&client, args),
        Commands::List(args) => run_list(&client, args),
        Commands::Ask(args) => {
            let batch = client.get_page_list_by_smw(&args.query, args.limit, args.offset)?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
            Ok(())
        }
    }
}

fn build_client(
    config_path: Option<PathBuf>,
    site: Option<String>,
    api_url: Option<String>,
) -> Result<WikiClient> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let mut config = load_config(&config_path)?;
    if site.is_some() {
        config.wiki.site = site;
        config.wiki.api_url = None;
    }
    if api_url.is_some() {
        config.wiki.api_url = api_url.clone();
    }

    let mut resolved = ClientConfig::from_config(&config)?;
    if let Some(url) = api_url {
        resolved.wiki_url = derive_wiki_url(&url).unwrap_or_else(|| url.clone());
        resolved.api_url = url;
    }
    tracing::debug!(api_url = %resolved.api_url, "resolved endpoint");
    Ok(WikiClient::new(&resolved)?)
}

fn ensure_login(client: &WikiClient) -> Result<()> {
    let username = std::env::var("WIKI_USERNAME").unwrap_or_default();
    let password = std::env::var("WIKI_PASSWORD").unwrap_or_default();
    if username.trim().is_empty() || password.is_empty() {
        bail!("WIKI_USERNAME and WIKI_PASSWORD must be set");
    }
    if !client.login(&username, &password)? {
        bail!("login failed: {}", client.last_error_message());
    }
    Ok(())
}

fn run_login(client: &WikiClient) -> Result<()> {
    ensure_login(client)?;
    println!("logged in as {}", client.user_name());
    println!("requests: {}", client.request_count());
    Ok(())
}

fn run_get(client: &WikiClient, args: GetArgs) -> Result<()> {
    match client.get_page_raw_text(&args.title)? {
        Some(page) => {
            println!("{}", page.content);
            Ok(())
        }
        None => bail!("page not found: {}", args.title),
    }
}

fn run_edit(client: &WikiClient, args: EditArgs) -> Result<()> {
    let text = match (args.file, args.text) {
        (Some(path), _) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(text)) => text,
        (None, None) => std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?,
    };
    ensure_login(client)?;
    let options = EditOptions {
        summary: args.summary,
        bot: !args.no_bot,
        skip_unchanged: args.skip_unchanged,
    };
    report(client.edit_page(&args.title, &text, &options)?)
}

fn run_move(client: &WikiClient, args: MoveArgs) -> Result<()> {
    ensure_login(client)?;
    let options = MoveOptions {
        reason: args.reason,
        move_talk: !args.no_talk,
        move_subpages: args.subpages,
        no_redirect: args.no_redirect,
    };
    report(client.move_page(&args.from, &args.to, &options)?)
}

fn run_upload(client: &WikiClient, args: UploadArgs) -> Result<()> {
    let filename = match args.filename {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("cannot derive a file name from {}", args.path.display()))?,
    };
    ensure_login(client)?;
    let options = UploadOptions {
        comment: args.comment,
        text: args.text,
    };
    report(client.upload_image(&args.path, &filename, &options)?)
}

fn run_list(client: &WikiClient, args: ListArgs) -> Result<()> {
    let options = ListOptions {
        limit: args.limit,
        continue_from: args.continue_from,
    };
    let batch = if let Some(category) = args.category {
        client.get_page_list_by_category(&category, &options)?
    } else if args.redirects {
        client.get_all_redirects(Some(args.namespace), &options)?
    } else {
        client.get_page_list_by_namespace(args.namespace, &options)?
    };
    for page in &batch.pages {
        println!("{}", page.title);
    }
    if let Some(token) = &batch.continuation {
        eprintln!("continue: {token}");
    }
    Ok(())
}

/// Print the API response; an error envelope fails the command.
fn report(response: ApiResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response.value())?);
    if let Some(error) = response.error() {
        bail!("wiki API error {error}");
    }
    Ok(())
}
