use clap::{Parser, Subcommand};
use cropproxy::imaging::{CropParams, ImageBackend, Quality, RustBackend};
use cropproxy::request::ImageRequest;
use cropproxy::{config, server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cropproxy")]
#[command(about = "HTTP proxy serving center-cropped JPEGs of remote images")]
#[command(long_about = "\
HTTP proxy serving center-cropped JPEGs of remote images

Request a rendition by putting the size and the source URL in the path:

  GET /{height}x{width}/{source url}

  /100x200/http://example.com/photo.jpg   200 wide, 100 high
  /50x50/example.com/x.jpg                scheme defaults to http
  /50x50/http%3A%2F%2Fexample.com%2Fx.jpg percent-encoded sources work too

Each rendition is fetched and rendered once, then served from the store.

Run 'cropproxy gen-config' to generate a documented cropproxy.toml.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP proxy
    Serve {
        /// Config file (default: ./cropproxy.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Center-crop a local image file to a JPEG
    Render {
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// JPEG quality (1-100)
        #[arg(long, default_value_t = Quality::default().value())]
        quality: u8,
        input: PathBuf,
        output: PathBuf,
    },
    /// Print the normalized source URL and cache key for a request path
    Key {
        /// Request path, e.g. /100x200/example.com/photo.jpg
        path: String,
    },
    /// Print a stock cropproxy.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config: config_path,
            bind,
        } => {
            init_tracing();
            let flags = bind.map(bind_overlay);
            let config = config::load_config(config_path.as_deref(), flags)?;
            let addr = config.bind_addr()?;
            let state = server::AppState::from_config(&config)?;
            tracing::info!(
                backend = ?config.store.backend,
                quality = config.images.quality,
                "starting cropproxy"
            );

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(addr, state))?;
        }
        Command::Render {
            width,
            height,
            quality,
            input,
            output,
        } => {
            let source = std::fs::read(&input)?;
            let backend = RustBackend::new();
            let original = backend.identify(&source)?;
            let params = CropParams::new(width, height).with_quality(Quality::new(quality));
            let jpeg = backend.center_crop(&source, &params)?;
            std::fs::write(&output, &jpeg)?;
            println!(
                "{} ({}x{}) → {} ({}x{}, {} bytes)",
                input.display(),
                original.width,
                original.height,
                output.display(),
                width,
                height,
                jpeg.len()
            );
        }
        Command::Key { path } => {
            let (path, query) = match path.split_once('?') {
                Some((p, q)) => (p, Some(q)),
                None => (path.as_str(), None),
            };
            let request = ImageRequest::from_path(path, query, u32::MAX)?;
            println!("source: {}", request.source_url);
            println!("size:   {}x{}", request.width, request.height);
            println!("key:    {}", request.cache_key());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `--bind` as a config overlay, so it goes through the same validation.
fn bind_overlay(bind: String) -> toml::Value {
    let mut server = toml::Table::new();
    server.insert("bind".into(), toml::Value::String(bind));
    let mut root = toml::Table::new();
    root.insert("server".into(), toml::Value::Table(server));
    toml::Value::Table(root)
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
