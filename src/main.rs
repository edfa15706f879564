use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use wordweaver::common::{
    GenerationRequest, DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};
use wordweaver::cycle::{GenerationCycle, DEFAULT_TIMEOUT};
use wordweaver::models::gradio::{DEFAULT_API_NAME, DEFAULT_SPACE};
use wordweaver::models::{GradioConfig, GradioSpace};
use wordweaver::{client, server};

const DEFAULT_HTTP_PORT: u16 = 8000;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[derive(Debug)]
struct Cli {
    #[arg(short, long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the poetry page and its API
    Serve {
        #[arg(short, long, default_value_t = DEFAULT_HTTP_PORT)]
        port: u16,

        #[command(flatten)]
        space: SpaceArgs,
    },
    /// Generate a single poem and print it
    Generate {
        prompt: String,

        #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
        max_length: u32,

        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,

        #[arg(long, default_value_t = DEFAULT_TOP_P)]
        top_p: f64,

        #[command(flatten)]
        space: SpaceArgs,
    },
}

#[derive(Args, Debug)]
struct SpaceArgs {
    /// Hugging Face Space hosting the model
    #[arg(long, env = "WORDWEAVER_SPACE", default_value = DEFAULT_SPACE)]
    space: String,

    /// Base URL of the Gradio app, used instead of the Space host
    #[arg(long, env = "WORDWEAVER_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_API_NAME)]
    api_name: String,

    #[arg(long, env = "WORDWEAVER_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,
}

impl SpaceArgs {
    fn into_cycle(self) -> GenerationCycle {
        let config = GradioConfig {
            space: self.space,
            endpoint: self.endpoint,
            api_name: self.api_name,
            hf_token: self.hf_token,
        };
        log::info!("Using Gradio app at {}", config.base_url());

        GenerationCycle::new(Arc::new(GradioSpace::new(config)))
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Some(Commands::Serve { port, space }) => {
            let cycle = Arc::new(space.into_cycle());
            server::start_server(port, cycle).await.map_err(|err| {
                log::error!("Server start failed: {}", err);
                err
            })
        }
        Some(Commands::Generate {
            prompt,
            max_length,
            temperature,
            top_p,
            space,
        }) => {
            let cycle = space.into_cycle();
            let request = GenerationRequest::new(prompt, max_length, temperature, top_p);
            match cycle.submit(request).await {
                Ok(result) => {
                    println!("{}", result.text);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{err}");
                    Err(err.into())
                }
            }
        }
        None => client::run_client(cli.port).await.map_err(|err| {
            log::error!("Client failed: {}", err);
            err
        }),
    };

    let exit_code = match result {
        Ok(_) => 0,
        _ => 1,
    };

    std::process::exit(exit_code);
}
