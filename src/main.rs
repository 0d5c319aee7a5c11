// ==========================================
// 价目表归一化管道 - 命令行入口
// ==========================================
// 用法:
//   price-ingest supplier <supplier_id> <name> [key|regular]
//   price-ingest import <supplier_id> <file>
//   price-ingest propose <supplier_id>
//   price-ingest confirm <mapping_id>
//   price-ingest reject <mapping_id>
//   price-ingest enrich <supplier_id>
//   price-ingest publish <supplier_id>
//   price-ingest tasks
//
// 数据库路径取 PRICE_INGEST_DB（默认 price_ingest.db）
// 报告以 JSON 输出到 stdout，日志写 stderr
// ==========================================

use anyhow::{bail, Context, Result};
use price_ingest::api::PipelineApi;
use price_ingest::domain::types::SupplierTier;
use price_ingest::logging;
use serde::Serialize;
use std::path::Path;

const DEFAULT_DB_PATH: &str = "price_ingest.db";

const USAGE: &str = "usage: price-ingest <supplier|import|propose|confirm|reject|enrich|publish|tasks> [args...]";

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg(args: &[String], idx: usize, name: &str) -> Result<String> {
    args.get(idx)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("missing argument <{name}>\n{USAGE}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("{USAGE}");
    };

    let db_path = std::env::var("PRICE_INGEST_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    tracing::info!(version = price_ingest::VERSION, db_path = %db_path, command = %command, "price-ingest 启动");
    let api = PipelineApi::open(&db_path).with_context(|| format!("无法打开数据库 {db_path}"))?;

    match command.as_str() {
        "supplier" => {
            let supplier_id = arg(&args, 1, "supplier_id")?;
            let name = arg(&args, 2, "name")?;
            let tier = args
                .get(3)
                .map(|t| SupplierTier::from_db_str(t))
                .unwrap_or(SupplierTier::Regular);
            print_json(&api.register_supplier(&supplier_id, &name, tier)?)?;
        }
        "import" => {
            let supplier_id = arg(&args, 1, "supplier_id")?;
            let file = arg(&args, 2, "file")?;
            print_json(&api.import_file(&supplier_id, Path::new(&file)).await?)?;
        }
        "propose" => {
            let supplier_id = arg(&args, 1, "supplier_id")?;
            print_json(&api.propose_mappings(&supplier_id)?)?;
        }
        "confirm" => {
            let mapping_id = arg(&args, 1, "mapping_id")?;
            print_json(&api.confirm_mapping(&mapping_id)?)?;
        }
        "reject" => {
            let mapping_id = arg(&args, 1, "mapping_id")?;
            api.reject_mapping(&mapping_id)?;
            println!("rejected {mapping_id}");
        }
        "enrich" => {
            let supplier_id = arg(&args, 1, "supplier_id")?;
            print_json(&api.enrich_supplier(&supplier_id).await?)?;
        }
        "publish" => {
            let supplier_id = arg(&args, 1, "supplier_id")?;
            print_json(&api.publish_supplier(&supplier_id)?)?;
        }
        "tasks" => {
            print_json(&api.list_open_tasks()?)?;
        }
        other => bail!("unknown command: {other}\n{USAGE}"),
    }

    Ok(())
}
