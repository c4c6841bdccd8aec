use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use layout_resource::{
    CurrentUser, FormLayoutQuery, MemoryPageStore, PageStore, ResourceResponse, form_layout,
    form_layout_list, save_form_layout,
};
use layout_spec::{Page, RecordedWarehouse, WarehouseSettings};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Form layout preview and attribute sync helper",
    long_about = "Renders form layout pages into the schema served to the recording app and dry-runs attribute synchronization against a recorded warehouse"
)]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command that talks to the warehouse.
#[derive(clap::Args, Debug, Clone, Default)]
struct WarehouseArgs {
    /// Warehouse settings JSON.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// Recorded warehouse replies: a list of {method, path, status, body}.
    #[arg(long, value_name = "FILE")]
    warehouse: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Render one page as the form schema served by the layout resource.
    Schema {
        /// Page JSON file.
        #[arg(long, value_name = "FILE")]
        page: PathBuf,
        /// Group controls into sections and regions instead of a flat list.
        #[arg(long)]
        layout: bool,
        /// Extra taxon attribute ids for preloaded species, e.g. 4,5.
        #[arg(long, value_name = "IDS")]
        taxon_attributes: Option<String>,
        #[command(flatten)]
        warehouse: WarehouseArgs,
    },
    /// List the published forms a user can see.
    List {
        /// JSON file holding an array of pages.
        #[arg(long, value_name = "FILE")]
        pages: PathBuf,
        /// Warehouse user id used to resolve group pages.
        #[arg(long, value_name = "ID")]
        user_id: Option<i64>,
        #[command(flatten)]
        warehouse: WarehouseArgs,
    },
    /// Run the layout save hook: create the survey and synchronize attributes.
    Sync {
        /// Page JSON file.
        #[arg(long, value_name = "FILE")]
        page: PathBuf,
        /// Act as a user allowed to edit attribute definitions.
        #[arg(long)]
        admin: bool,
        /// Where to write the page with its updated bindings.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        #[command(flatten)]
        warehouse: WarehouseArgs,
    },
    /// Print the JSON Schema of the page file format.
    PageSchema,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Schema {
            page,
            layout,
            taxon_attributes,
            warehouse,
        } => run_schema(&page, layout, taxon_attributes, &warehouse),
        Command::List {
            pages,
            user_id,
            warehouse,
        } => run_list(&pages, user_id, &warehouse),
        Command::Sync {
            page,
            admin,
            out,
            warehouse,
        } => run_sync(&page, admin, out.as_deref(), &warehouse),
        Command::PageSchema => run_page_schema(),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

impl WarehouseArgs {
    fn settings(&self) -> CliResult<WarehouseSettings> {
        match &self.settings {
            Some(path) => Ok(WarehouseSettings::from_json_str(&read(path)?)?),
            None => Ok(WarehouseSettings::default()),
        }
    }

    fn warehouse(&self) -> CliResult<RecordedWarehouse> {
        match &self.warehouse {
            Some(path) => Ok(RecordedWarehouse::from_json_str(&read(path)?)?),
            None => Ok(RecordedWarehouse::default()),
        }
    }
}

fn read(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()).into())
}

fn load_page(path: &Path) -> CliResult<Page> {
    let page: Page = serde_json::from_str(&read(path)?)?;
    debug!(page_id = page.id, path = %path.display(), "loaded page");
    Ok(page)
}

fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(response: ResourceResponse) -> CliResult<()> {
    if response.is_success() {
        return print_json(&response.body);
    }
    let message = response
        .body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    Err(format!("{message} (status {})", response.status).into())
}

fn run_schema(
    path: &Path,
    layout: bool,
    taxon_attributes: Option<String>,
    args: &WarehouseArgs,
) -> CliResult<()> {
    let page = load_page(path)?;
    let page_id = page.id;
    let store = MemoryPageStore::new([page]);
    let query = FormLayoutQuery {
        layout,
        taxon_attributes,
    };
    let response = form_layout(&store, &args.warehouse()?, &args.settings()?, page_id, &query);
    finish(response)
}

fn run_list(path: &Path, user_id: Option<i64>, args: &WarehouseArgs) -> CliResult<()> {
    let pages: Vec<Page> = serde_json::from_str(&read(path)?)?;
    let store = MemoryPageStore::new(pages);
    let user = CurrentUser {
        indicia_user_id: user_id,
        ..CurrentUser::default()
    };
    let response = form_layout_list(&store, &args.warehouse()?, &args.settings()?, &user);
    finish(response)
}

fn run_sync(path: &Path, admin: bool, out: Option<&Path>, args: &WarehouseArgs) -> CliResult<()> {
    let page = load_page(path)?;
    let page_id = page.id;
    let mut store = MemoryPageStore::new([page]);
    let actor = CurrentUser {
        indicia_user_id: None,
        is_attribute_admin: admin,
    };
    let warehouse = args.warehouse()?;
    let outcome = save_form_layout(&mut store, &warehouse, &args.settings()?, &actor, page_id)?;
    print_json(&outcome)?;

    if let Some(out) = out
        && let Some(page) = store.load(page_id)
    {
        fs::write(out, serde_json::to_string_pretty(&page)?)?;
        debug!(path = %out.display(), requests = warehouse.requests().len(), "wrote page");
    }
    match outcome.error {
        Some(error) => Err(format!("synchronization incomplete: {error}").into()),
        None => Ok(()),
    }
}

fn run_page_schema() -> CliResult<()> {
    print_json(&schemars::schema_for!(Page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbose_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["iform-layout", "page-schema", "--verbose"]).expect("parse");
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::PageSchema));
    }

    #[test]
    fn schema_arguments() {
        let cli = Cli::try_parse_from([
            "iform-layout",
            "schema",
            "--page",
            "page.json",
            "--layout",
            "--taxon-attributes",
            "4,5",
            "--warehouse",
            "replies.json",
        ])
        .expect("parse");
        let Command::Schema {
            page,
            layout,
            taxon_attributes,
            warehouse,
        } = cli.command
        else {
            panic!("expected schema command");
        };
        assert_eq!(page, PathBuf::from("page.json"));
        assert!(layout);
        assert_eq!(taxon_attributes.as_deref(), Some("4,5"));
        assert_eq!(warehouse.warehouse, Some(PathBuf::from("replies.json")));
        assert!(warehouse.settings.is_none());
    }

    #[test]
    fn sync_runs_without_a_recorded_warehouse() {
        let cli = Cli::try_parse_from(["iform-layout", "sync", "--page", "page.json"]).expect("parse");
        let Command::Sync { warehouse, out, .. } = cli.command else {
            panic!("expected sync");
        };
        assert!(warehouse.warehouse.is_none());
        assert!(out.is_none());
        assert_eq!(warehouse.settings().expect("settings").website_id, 0);
    }

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let settings = WarehouseArgs::default().settings().expect("settings");
        assert_eq!(settings, WarehouseSettings::default());
    }

    mod process {
        use assert_cmd::Command;
        use assert_fs::prelude::*;
        use serde_json::{Value, json};

        const SETTINGS: &str = r#"{"website_id": 3, "base_url": "https://frogs.example.org"}"#;

        fn fixture(name: &str) -> &'static str {
            match name {
                "page" => include_str!("../tests/fixtures/page.json"),
                "pages" => include_str!("../tests/fixtures/pages.json"),
                "group_pages" => include_str!("../tests/fixtures/group_pages.json"),
                "new_survey_page" => include_str!("../tests/fixtures/new_survey_page.json"),
                "sync_warehouse" => include_str!("../tests/fixtures/sync_warehouse.json"),
                _ => panic!("unknown fixture {}", name),
            }
        }

        fn stdout_json(output: &std::process::Output) -> Value {
            serde_json::from_slice(&output.stdout).expect("json on stdout")
        }

        #[test]
        fn schema_prints_flat_controls() -> Result<(), Box<dyn std::error::Error>> {
            let workspace = assert_fs::TempDir::new()?;
            let page = workspace.child("page.json");
            page.write_str(fixture("page"))?;

            let output = Command::cargo_bin("iform-layout")?
                .arg("schema")
                .arg("--page")
                .arg(page.path())
                .output()?;
            assert!(output.status.success());
            let schema = stdout_json(&output);
            assert_eq!(schema["type"], "single_species_form");
            assert_eq!(schema["controls"][3]["field_name"], "occAttr:7");
            Ok(())
        }

        #[test]
        fn list_filters_group_pages() -> Result<(), Box<dyn std::error::Error>> {
            let workspace = assert_fs::TempDir::new()?;
            let pages = workspace.child("pages.json");
            pages.write_str(fixture("pages"))?;
            let warehouse = workspace.child("warehouse.json");
            warehouse.write_str(fixture("group_pages"))?;
            let settings = workspace.child("settings.json");
            settings.write_str(SETTINGS)?;

            let output = Command::cargo_bin("iform-layout")?
                .args(["list", "--user-id", "5"])
                .arg("--pages")
                .arg(pages.path())
                .arg("--warehouse")
                .arg(warehouse.path())
                .arg("--settings")
                .arg(settings.path())
                .output()?;
            assert!(output.status.success());
            let list = stdout_json(&output);
            let ids: Vec<i64> = list
                .as_array()
                .expect("array")
                .iter()
                .filter_map(|entry| entry["id"].as_i64())
                .collect();
            assert_eq!(ids, vec![21, 22]);
            assert_eq!(list[1]["groups"], json!(["Pond club members"]));
            assert_eq!(
                list[0]["href"],
                "https://frogs.example.org/iform_layout_builder/form_layout/21"
            );
            Ok(())
        }

        #[test]
        fn sync_writes_resolved_page() -> Result<(), Box<dyn std::error::Error>> {
            let workspace = assert_fs::TempDir::new()?;
            let page = workspace.child("page.json");
            page.write_str(fixture("new_survey_page"))?;
            let warehouse = workspace.child("warehouse.json");
            warehouse.write_str(fixture("sync_warehouse"))?;
            let settings = workspace.child("settings.json");
            settings.write_str(SETTINGS)?;
            let out = workspace.child("out.json");

            let output = Command::cargo_bin("iform-layout")?
                .arg("sync")
                .arg("--page")
                .arg(page.path())
                .arg("--warehouse")
                .arg(warehouse.path())
                .arg("--settings")
                .arg(settings.path())
                .arg("--out")
                .arg(out.path())
                .output()?;
            assert!(output.status.success());
            let outcome = stdout_json(&output);
            assert_eq!(outcome["survey_id"], 90);
            assert_eq!(outcome["report"]["created"], json!([310]));

            let saved: Value = serde_json::from_str(&std::fs::read_to_string(out.path())?)?;
            assert_eq!(saved["survey_id"], 90);
            let binding = &saved["sections"][0]["components"][0]["binding"];
            assert_eq!(binding["attribute_id"], 310);
            assert_eq!(binding["attributes_website_id"], 3100);
            Ok(())
        }

        #[test]
        fn missing_page_file_fails() -> Result<(), Box<dyn std::error::Error>> {
            let workspace = tempfile::tempdir()?;
            Command::cargo_bin("iform-layout")?
                .arg("schema")
                .arg("--page")
                .arg(workspace.path().join("absent.json"))
                .assert()
                .failure();
            Ok(())
        }

        #[test]
        fn page_schema_describes_pages() -> Result<(), Box<dyn std::error::Error>> {
            let output = Command::cargo_bin("iform-layout")?.arg("page-schema").output()?;
            assert!(output.status.success());
            let schema = stdout_json(&output);
            assert_eq!(schema["title"], "Page");
            assert!(schema["properties"]["sections"].is_object());
            Ok(())
        }
    }
}
