//! Comic Translator CLI - Command line tool for translating comic chapters.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comic_translator_core::config::{ExportImageFormat, MergeMode};
use comic_translator_core::pipeline::ProgressFn;
use comic_translator_core::{
    clear_translation_cache, AppConfig, CancelHandle, Chapter, ChapterStatus, ComicTranslator, Lang,
    CoordinateFrame, PreprocessOptions, PreprocessPipeline, ProjectStore, TextColor, TranslatorProvider,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Black,
    White,
    DarkRed,
    Blue,
}

impl From<ColorOption> for TextColor {
    fn from(opt: ColorOption) -> Self {
        match opt {
            ColorOption::Black => Self::black(),
            ColorOption::White => Self::white(),
            ColorOption::DarkRed => Self::dark_red(),
            ColorOption::Blue => Self::blue(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderOption {
    Openai,
    Deepl,
}

impl From<ProviderOption> for TranslatorProvider {
    fn from(opt: ProviderOption) -> Self {
        match opt {
            ProviderOption::Openai => Self::OpenAi,
            ProviderOption::Deepl => Self::DeepL,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatOption {
    Png,
    Jpg,
}

impl From<FormatOption> for ExportImageFormat {
    fn from(opt: FormatOption) -> Self {
        match opt {
            FormatOption::Png => Self::Png,
            FormatOption::Jpg => Self::Jpg,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MergeOption {
    Off,
    Lines,
    Bubbles,
}

impl From<MergeOption> for MergeMode {
    fn from(opt: MergeOption) -> Self {
        match opt {
            MergeOption::Off => Self::Off,
            MergeOption::Lines => Self::Lines,
            MergeOption::Bubbles => Self::Bubbles,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "comic-translate")]
#[command(author, version, about = "Translate comic and manga pages", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a folder of page images
    Run {
        /// Folder containing the chapter's page images
        input: PathBuf,

        /// Output folder for the project file and exports (default: <input>-<target>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chapter name (default: input folder name)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Continue a chapter saved in an output folder
    Resume {
        /// Output folder containing project.json
        output: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Redraw the text of finished pages, e.g. with another font or color
    Rerender {
        /// Output folder containing project.json
        output: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Write the processing-frame image of a page, exactly as detection sees it
    Preview {
        /// Source page image
        image: PathBuf,

        /// Output image path (default: <image>-frame.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove all cached translations
    ClearCache {
        /// Cache directory (default: the configured disk cache)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Options shared by every command that processes a chapter.
#[derive(Args, Debug)]
struct RunOptions {
    /// Source language code
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Target language code
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Translation backend
    #[arg(long, value_enum)]
    provider: Option<ProviderOption>,

    /// Translation API base URL
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,

    /// Translation API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name for OpenAI-compatible API
    #[arg(long, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// DeepL API key, used when the provider is deepl
    #[arg(long, env = "DEEPL_API_KEY", hide_env_values = true)]
    deepl_key: Option<String>,

    /// OCR service endpoint
    #[arg(long, env = "COMIC_TRANSLATOR_OCR_URL")]
    ocr_url: Option<String>,

    /// Font file for lettering
    #[arg(long)]
    font: Option<PathBuf>,

    /// Lettering color
    #[arg(long, value_enum)]
    color: Option<ColorOption>,

    /// Exported image format
    #[arg(long, value_enum)]
    format: Option<FormatOption>,

    /// Pages processed at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// How OCR lines are grouped into regions
    #[arg(long, value_enum)]
    merge: Option<MergeOption>,

    /// Skip the combined PDF
    #[arg(long)]
    no_pdf: bool,

    /// Disable caching
    #[arg(long)]
    no_cache: bool,
}

impl RunOptions {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(source) = &self.source {
            config.source_lang = Lang::new(source);
        }
        if let Some(target) = &self.target {
            config.target_lang = Lang::new(target);
        }

        let translator = &mut config.translator;
        if let Some(provider) = self.provider {
            translator.provider = provider.into();
        }
        if let Some(api_base) = &self.api_base {
            translator.api_base.clone_from(api_base);
        }
        if let Some(model) = &self.model {
            translator.model.clone_from(model);
        }
        let key = match translator.provider {
            TranslatorProvider::DeepL => self.deepl_key.as_ref(),
            TranslatorProvider::OpenAi => self.api_key.as_ref(),
        };
        if key.is_some() {
            translator.api_key = key.cloned();
        }

        if let Some(url) = &self.ocr_url {
            config.detection.endpoint.clone_from(url);
        }
        if let Some(merge) = self.merge {
            config.detection.merge = merge.into();
        }
        if let Some(font) = &self.font {
            config.render.font_path = Some(font.clone());
        }
        if let Some(color) = self.color {
            config.render.text_color = color.into();
        }
        if let Some(format) = self.format {
            config.export.image_format = format.into();
        }
        if let Some(concurrency) = self.concurrency {
            config.pipeline.concurrency = concurrency;
        }
        if self.no_pdf {
            config.export.create_pdf = false;
        }
        if self.no_cache {
            config.cache.memory_enabled = false;
            config.cache.disk_enabled = false;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path).context("Failed to load config file"),
        None => Ok(AppConfig::load()),
    }
}

fn default_output_dir(input: &Path, target: &Lang) -> PathBuf {
    let stem = input
        .file_name()
        .map_or_else(|| "chapter".to_string(), |n| n.to_string_lossy().into_owned());
    input.with_file_name(format!("{stem}-{target}"))
}

/// Restore the chapter saved in `output`, switching it to any language given
/// on the command line.
fn restore_chapter(output: &Path, options: &RunOptions) -> Result<Chapter> {
    let mut chapter = ProjectStore::in_dir(output)
        .restore()
        .context(format!("No saved chapter in {}", output.display()))?;

    if options.source.is_some() || options.target.is_some() {
        let source = options.source.as_deref().map_or_else(|| chapter.source_lang.clone(), Lang::new);
        let target = options.target.as_deref().map_or_else(|| chapter.target_lang.clone(), Lang::new);
        if chapter.set_languages(source, target) {
            warn!(
                "Language pair changed to {} -> {}, translating every region again",
                chapter.source_lang, chapter.target_lang
            );
        }
    }
    Ok(chapter)
}

/// Preprocess `image` and save the processing frame. Only the preprocessing
/// settings are needed; no engine or cache is built.
fn write_preview(
    options: PreprocessOptions,
    image: &Path,
    output: Option<PathBuf>,
) -> Result<(CoordinateFrame, PathBuf)> {
    let (frame_image, frame) = PreprocessPipeline::new(options)
        .process_path(image)
        .context(format!("Failed to preprocess {}", image.display()))?;
    let output = output.unwrap_or_else(|| {
        let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
        image.with_file_name(format!("{stem}-frame.png"))
    });
    frame_image
        .save(&output)
        .context(format!("Failed to write {}", output.display()))?;
    Ok((frame, output))
}

/// Process a chapter, print the run summary and export finished pages.
async fn process_chapter(translator: &ComicTranslator, mut chapter: Chapter, output: &Path) -> Result<()> {
    let pipeline = translator.pipeline(output);

    if let Some(font) = &translator.config().render.font_path
        && chapter.font_selection.as_ref() != Some(font)
    {
        chapter.font_selection = Some(font.clone());
        let count = pipeline.rerender(&mut chapter);
        if count > 0 {
            info!("Font changed, re-lettering {} pages", count);
        }
    }

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing pages in progress");
            on_interrupt.cancel();
        }
    });

    let pb = ProgressBar::new(chapter.pages.len() as u64);
    // Template is hardcoded and valid, unwrap is safe
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(chapter.name.clone());

    let progress: ProgressFn<'_> = &|done, _total| pb.set_position(done as u64);
    let result = pipeline.run_with(&mut chapter, &cancel, Some(progress)).await;
    pb.finish_and_clear();

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("{result}");
    }

    if result.cancelled {
        #[allow(clippy::print_stdout)]
        {
            println!("Run interrupted; continue with: comic-translate resume {}", output.display());
        }
        return Ok(());
    }

    if chapter.done_pages().next().is_none() {
        anyhow::bail!("No page finished, nothing to export");
    }

    let writer = translator.export_writer(output, &chapter);
    let summary = pipeline
        .export(&chapter, &writer)
        .context("Failed to export translated pages")?;

    #[allow(clippy::print_stdout)]
    {
        println!("Exported {} images to {}", summary.images.len(), output.display());
        if let Some(document) = &summary.document {
            println!("Chapter PDF saved to: {}", document.display());
        }
        if result.status == ChapterStatus::PartiallyComplete {
            println!(
                "{} pages failed; fix the cause and run: comic-translate resume {}",
                result.failed_pages.len(),
                output.display()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            input,
            output,
            name,
            options,
        } => {
            options.apply(&mut config);
            let output = output.unwrap_or_else(|| default_output_dir(&input, &config.target_lang));
            let translator = ComicTranslator::new(config).context("Failed to initialize translator")?;
            let chapter = translator
                .open_chapter(&input, &output, name.as_deref())
                .context(format!("Failed to load chapter from {}", input.display()))?;
            if chapter.pages.is_empty() {
                anyhow::bail!("No images found in {}", input.display());
            }
            process_chapter(&translator, chapter, &output).await
        }
        Command::Resume { output, options } => {
            options.apply(&mut config);
            let chapter = restore_chapter(&output, &options)?;
            let translator = ComicTranslator::new(config).context("Failed to initialize translator")?;
            process_chapter(&translator, chapter, &output).await
        }
        Command::Rerender { output, options } => {
            options.apply(&mut config);
            let mut chapter = restore_chapter(&output, &options)?;
            let translator = ComicTranslator::new(config).context("Failed to initialize translator")?;
            let count = translator.pipeline(&output).rerender(&mut chapter);
            info!("Re-lettering {} pages", count);
            process_chapter(&translator, chapter, &output).await
        }
        Command::Preview { image, output } => {
            let (frame, output) = write_preview(config.preprocess, &image, output)?;

            #[allow(clippy::print_stdout)]
            {
                println!(
                    "Frame {}x{} (source {}x{}, scale {:.4}) saved to: {}",
                    frame.frame_width,
                    frame.frame_height,
                    frame.source_width,
                    frame.source_height,
                    frame.scale,
                    output.display()
                );
            }
            Ok(())
        }
        Command::ClearCache { path } => {
            let path = path.or_else(|| config.cache.disk_path.clone());
            let count = clear_translation_cache(path.as_deref()).map_err(|e| anyhow!(e))?;

            #[allow(clippy::print_stdout)]
            {
                println!("Cleared {count} cached translations");
            }
            Ok(())
        }
    }
}
