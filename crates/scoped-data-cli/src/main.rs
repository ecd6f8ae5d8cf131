use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use scoped_data_api::{
    DeleteDataRequest, RegisterContainerRequest, ScopedDataApi, UpdateDataRequest,
    DEFAULT_PAGE_LIMIT,
};
use scoped_data_core::{
    ArchivedDataInstanceId, ContainerRef, DataChangeSet, DataError, DataInstanceId, DataValue,
    NewDataInstance,
};
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "SDR_LOG";

#[derive(Debug, Parser)]
#[command(name = "sdr")]
#[command(about = "Scoped data resolution and archiving CLI")]
struct Cli {
    #[arg(long, default_value = "./scoped_data.sqlite3")]
    db: PathBuf,

    /// YAML file with engine settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },
    Data {
        #[command(subcommand)]
        command: Box<DataCommand>,
    },
    Archive {
        #[command(subcommand)]
        command: Box<ArchiveCommand>,
    },
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum ContainerCommand {
    Add(ContainerAddArgs),
    Archive(ContainerArgs),
    Hierarchy(ContainerHierarchyArgs),
}

#[derive(Debug, Clone, Args)]
struct ContainerArgs {
    #[arg(long)]
    container_id: i64,
    #[arg(long)]
    container_type: String,
}

impl ContainerArgs {
    fn container(&self) -> ContainerRef {
        ContainerRef::new(self.container_id, self.container_type.clone())
    }
}

#[derive(Debug, Args)]
struct ContainerAddArgs {
    #[command(flatten)]
    container: ContainerArgs,
    #[arg(long, requires = "parent_type")]
    parent_id: Option<i64>,
    #[arg(long, requires = "parent_id")]
    parent_type: Option<String>,
}

#[derive(Debug, Args)]
struct ContainerHierarchyArgs {
    #[command(flatten)]
    container: ContainerArgs,
    /// Walk archived ancestors too.
    #[arg(long, default_value_t = false)]
    archived: bool,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: usize,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct ValueArgs {
    /// Tagged value, e.g. `{"kind":"double","value":1.5}`.
    #[arg(long)]
    value_json: Option<String>,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    integer: Option<i64>,
    #[arg(long)]
    boolean: Option<bool>,
}

impl ValueArgs {
    fn parse(&self) -> Result<Option<DataValue>> {
        if let Some(raw) = &self.value_json {
            let value = serde_json::from_str(raw)
                .with_context(|| format!("invalid tagged value JSON: {raw}"))?;
            return Ok(Some(value));
        }
        Ok(self
            .text
            .clone()
            .map(DataValue::Text)
            .or(self.integer.map(DataValue::Integer))
            .or(self.boolean.map(DataValue::Boolean)))
    }
}

#[derive(Debug, Subcommand)]
enum DataCommand {
    Create(DataCreateArgs),
    Update(DataUpdateArgs),
    Delete(DataIdArgs),
    Get(DataNameArgs),
    GetMany(DataNamesArgs),
    GetAll(DataPagedArgs),
    GetLocal(DataNameArgs),
    GetLocalAll(DataPagedArgs),
    GetById(DataIdArgs),
    CountLocal(ContainerArgs),
    DeleteAllLocal(ContainerArgs),
}

#[derive(Debug, Args)]
struct DataCreateArgs {
    #[arg(long)]
    name: String,
    #[command(flatten)]
    container: ContainerArgs,
    #[command(flatten)]
    value: ValueArgs,
    #[arg(long)]
    description: Option<String>,
    /// Skip archiving for this instance.
    #[arg(long, default_value_t = false)]
    transient: bool,
}

#[derive(Debug, Args)]
struct DataUpdateArgs {
    #[arg(long)]
    id: i64,
    #[command(flatten)]
    value: ValueArgs,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct DataIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct DataNameArgs {
    #[arg(long)]
    name: String,
    #[command(flatten)]
    container: ContainerArgs,
}

#[derive(Debug, Args)]
struct DataNamesArgs {
    #[arg(long = "name")]
    names: Vec<String>,
    #[command(flatten)]
    container: ContainerArgs,
}

#[derive(Debug, Args)]
struct DataPagedArgs {
    #[command(flatten)]
    container: ContainerArgs,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Subcommand)]
enum ArchiveCommand {
    Get(ArchiveNameArgs),
    GetMany(ArchiveNamesArgs),
    GetAll(ArchivePagedArgs),
    BySource(ArchiveBySourceArgs),
    ById(DataIdArgs),
    History(ArchiveHistoryArgs),
    LocalAll(DataPagedArgs),
    LastLocalAll(DataPagedArgs),
    PurgeLocal(ContainerArgs),
}

#[derive(Debug, Args)]
struct AsOfArgs {
    /// RFC3339 UTC instant; defaults to now.
    #[arg(long)]
    as_of: Option<String>,
}

impl AsOfArgs {
    fn parse(&self) -> Result<Option<OffsetDateTime>> {
        self.as_of.as_deref().map(parse_rfc3339).transpose()
    }
}

#[derive(Debug, Args)]
struct ArchiveNameArgs {
    #[arg(long)]
    name: String,
    #[command(flatten)]
    container: ContainerArgs,
    #[command(flatten)]
    as_of: AsOfArgs,
}

#[derive(Debug, Args)]
struct ArchiveNamesArgs {
    #[arg(long = "name")]
    names: Vec<String>,
    #[command(flatten)]
    container: ContainerArgs,
    #[command(flatten)]
    as_of: AsOfArgs,
}

#[derive(Debug, Args)]
struct ArchivePagedArgs {
    #[command(flatten)]
    container: ContainerArgs,
    #[command(flatten)]
    as_of: AsOfArgs,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Args)]
struct ArchiveBySourceArgs {
    #[arg(long)]
    source_id: i64,
    #[command(flatten)]
    as_of: AsOfArgs,
}

#[derive(Debug, Args)]
struct ArchiveHistoryArgs {
    #[arg(long)]
    source_id: i64,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Subcommand)]
enum EventsCommand {
    List(EventsListArgs),
}

#[derive(Debug, Args)]
struct EventsListArgs {
    /// Only events with a larger sequence number.
    #[arg(long, default_value_t = 0)]
    after_seq: i64,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: usize,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn to_json(value: &impl serde::Serialize, what: &str) -> Result<Value> {
    serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))
}

/// Failure payload; `kind` is the engine error kind or `internal`.
fn error_json(err: &anyhow::Error) -> Value {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<DataError>())
        .map_or("internal", |data_error| data_error.kind().as_str());
    with_contract_version(serde_json::json!({
        "error": {
            "kind": kind,
            "message": format!("{err:#}"),
        }
    }))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("{}", error_json(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let api = ScopedDataApi::from_config_file(cli.db, cli.config.as_deref())?;
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Container { command } => run_container(command, &api),
        Command::Data { command } => run_data(*command, &api),
        Command::Archive { command } => run_archive(*command, &api),
        Command::Events { command } => run_events(command, &api),
    }
}

fn run_db(command: DbCommand, api: &ScopedDataApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
            }))
        }
        DbCommand::Migrate(args) => {
            emit_json(to_json(&api.migrate(args.dry_run)?, "migration result")?)
        }
        DbCommand::IntegrityCheck => {
            emit_json(to_json(&api.integrity_check()?, "integrity report")?)
        }
    }
}

fn run_container(command: ContainerCommand, api: &ScopedDataApi) -> Result<()> {
    match command {
        ContainerCommand::Add(args) => {
            let parent = match (args.parent_id, args.parent_type) {
                (Some(id), Some(container_type)) => Some(ContainerRef::new(id, container_type)),
                _ => None,
            };
            let record = api.register_container(RegisterContainerRequest {
                container: args.container.container(),
                parent,
            })?;
            emit_json(to_json(&record, "container record")?)
        }
        ContainerCommand::Archive(args) => {
            emit_json(to_json(&api.archive_container(&args.container())?, "container record")?)
        }
        ContainerCommand::Hierarchy(args) => {
            let hierarchy = api.container_hierarchy(&args.container.container(), args.archived)?;
            emit_json(serde_json::json!({
                "archived": args.archived,
                "containers": hierarchy.as_slice(),
            }))
        }
    }
}

fn run_data(command: DataCommand, api: &ScopedDataApi) -> Result<()> {
    match command {
        DataCommand::Create(args) => {
            let value = args.value.parse()?.ok_or_else(|| {
                anyhow!("a value is required: --value-json, --text, --integer or --boolean")
            })?;
            let mut input = NewDataInstance::new(args.name, args.container.container(), value);
            input.description = args.description;
            if args.transient {
                input = input.transient();
            }
            emit_json(to_json(&api.create_data(input)?, "data instance")?)
        }
        DataCommand::Update(args) => {
            let changes =
                DataChangeSet { value: args.value.parse()?, description: args.description };
            let updated =
                api.update_data(UpdateDataRequest { id: DataInstanceId(args.id), changes })?;
            emit_json(to_json(&updated, "data instance")?)
        }
        DataCommand::Delete(args) => {
            let deleted = api.delete_data(DeleteDataRequest { id: DataInstanceId(args.id) })?;
            emit_json(serde_json::json!({ "deleted": deleted }))
        }
        DataCommand::Get(args) => {
            let instance = api.get_data(&args.name, &args.container.container())?;
            emit_json(to_json(&instance, "data instance")?)
        }
        DataCommand::GetMany(args) => {
            let instances = api.get_many_data(&args.names, &args.container.container())?;
            emit_json(serde_json::json!({ "data_instances": instances }))
        }
        DataCommand::GetAll(args) => {
            let instances =
                api.get_all_data(&args.container.container(), args.page.offset, args.page.limit)?;
            emit_json(serde_json::json!({ "data_instances": instances }))
        }
        DataCommand::GetLocal(args) => {
            let instance = api.get_local_data(&args.name, &args.container.container())?;
            emit_json(to_json(&instance, "data instance")?)
        }
        DataCommand::GetLocalAll(args) => {
            let instances = api.get_local_all_data(
                &args.container.container(),
                args.page.offset,
                args.page.limit,
            )?;
            emit_json(serde_json::json!({ "data_instances": instances }))
        }
        DataCommand::GetById(args) => {
            emit_json(to_json(&api.get_data_by_id(DataInstanceId(args.id))?, "data instance")?)
        }
        DataCommand::CountLocal(args) => {
            let container = args.container();
            let count = api.count_local_data(&container)?;
            emit_json(serde_json::json!({ "container": container, "count": count }))
        }
        DataCommand::DeleteAllLocal(args) => {
            let container = args.container();
            let deleted = api.delete_all_local_data(&container)?;
            emit_json(serde_json::json!({ "container": container, "deleted": deleted }))
        }
    }
}

fn run_archive(command: ArchiveCommand, api: &ScopedDataApi) -> Result<()> {
    match command {
        ArchiveCommand::Get(args) => {
            let archived =
                api.archived_get(&args.name, &args.container.container(), args.as_of.parse()?)?;
            emit_json(to_json(&archived, "archived data instance")?)
        }
        ArchiveCommand::GetMany(args) => {
            let archived = api.archived_get_many(
                &args.names,
                &args.container.container(),
                args.as_of.parse()?,
            )?;
            emit_json(serde_json::json!({ "archived_data_instances": archived }))
        }
        ArchiveCommand::GetAll(args) => {
            let archived = api.archived_get_all(
                &args.container.container(),
                args.as_of.parse()?,
                args.page.offset,
                args.page.limit,
            )?;
            emit_json(serde_json::json!({ "archived_data_instances": archived }))
        }
        ArchiveCommand::BySource(args) => {
            let archived =
                api.archived_by_source(DataInstanceId(args.source_id), args.as_of.parse()?)?;
            emit_json(to_json(&archived, "archived data instance")?)
        }
        ArchiveCommand::ById(args) => {
            let archived = api.archived_by_id(ArchivedDataInstanceId(args.id))?;
            emit_json(to_json(&archived, "archived data instance")?)
        }
        ArchiveCommand::History(args) => {
            let history = api.archived_history(
                DataInstanceId(args.source_id),
                args.page.offset,
                args.page.limit,
            )?;
            emit_json(serde_json::json!({ "archived_data_instances": history }))
        }
        ArchiveCommand::LocalAll(args) => {
            let archived = api.archived_local_all(
                &args.container.container(),
                args.page.offset,
                args.page.limit,
            )?;
            emit_json(serde_json::json!({ "archived_data_instances": archived }))
        }
        ArchiveCommand::LastLocalAll(args) => {
            let archived = api.archived_last_local_all(
                &args.container.container(),
                args.page.offset,
                args.page.limit,
            )?;
            emit_json(serde_json::json!({ "archived_data_instances": archived }))
        }
        ArchiveCommand::PurgeLocal(args) => {
            let container = args.container();
            let purged = api.purge_local_archived(&container)?;
            emit_json(serde_json::json!({ "container": container, "purged": purged }))
        }
    }
}

fn run_events(command: EventsCommand, api: &ScopedDataApi) -> Result<()> {
    match command {
        EventsCommand::List(args) => {
            let events = api.list_change_events(args.after_seq, args.limit)?;
            emit_json(serde_json::json!({ "events": events }))
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}
