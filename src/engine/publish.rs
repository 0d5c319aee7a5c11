// ==========================================
// 价目表归一化管道 - 发布对账
// ==========================================
// 输入: 供应商最近一个 parsed 批次的候选报价 + confirmed 映射
// 输出: 供应商新的 active 报价集合
// 红线: 停用旧集合与写入新集合在同一事务内完成（由 OfferRepository 保证）
// 红线: 未映射候选计数跳过，不中断发布
// ==========================================

use crate::domain::batch::ImportBatch;
use crate::domain::catalog::Offer;
use crate::domain::item::{AttributeField, OfferCandidate, SupplierItem};
use crate::domain::types::BatchStatus;
use crate::repository::{
    CatalogRepository, ImportRepository, OfferRepository, RepositoryError,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("发布前置条件不满足: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub batch_id: String,
    pub deactivated: usize,
    pub created: usize,
    pub skipped_unmapped: usize,
}

/// 报价展示标题
///
/// 有人工整理的 clean_name 时直接使用；否则按
/// 花型、亚型（小写）、品种、产地、首个颜色、"<长度> см" 顺序拼接。
pub fn display_title(item: &SupplierItem, length_cm: Option<u32>) -> String {
    let attrs = &item.attributes;
    if let Some(clean) = attrs.text(AttributeField::CleanName).filter(|s| !s.trim().is_empty()) {
        return clean.trim().to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(t) = attrs.text(AttributeField::FlowerType) {
        parts.push(t.to_string());
    }
    if let Some(s) = attrs.text(AttributeField::Subtype) {
        parts.push(s.to_lowercase());
    }
    if let Some(v) = attrs.text(AttributeField::Variety) {
        parts.push(v.to_string());
    }
    if let Some(c) = attrs.text(AttributeField::OriginCountry) {
        parts.push(c.to_string());
    }
    if let Some(color) = attrs.list(AttributeField::Colors).first() {
        parts.push(color.clone());
    }
    if let Some(len) = length_cm {
        parts.push(format!("{len} см"));
    }

    if parts.is_empty() {
        item.raw_name.trim().to_string()
    } else {
        parts.join(" ")
    }
}

pub struct PublishReconciler {
    import_repo: Arc<dyn ImportRepository>,
    catalog_repo: Arc<dyn CatalogRepository>,
    offer_repo: Arc<dyn OfferRepository>,
}

impl PublishReconciler {
    pub fn new(
        import_repo: Arc<dyn ImportRepository>,
        catalog_repo: Arc<dyn CatalogRepository>,
        offer_repo: Arc<dyn OfferRepository>,
    ) -> Self {
        Self {
            import_repo,
            catalog_repo,
            offer_repo,
        }
    }

    #[instrument(skip(self))]
    pub fn publish_supplier(&self, supplier_id: &str) -> PublishResult<PublishReport> {
        match self.import_repo.find_supplier(supplier_id)? {
            Some(s) if s.is_active => {}
            Some(_) => {
                return Err(PublishError::PreconditionFailed(format!(
                    "supplier {supplier_id} is not active"
                )))
            }
            None => {
                return Err(PublishError::PreconditionFailed(format!(
                    "supplier {supplier_id} not found"
                )))
            }
        }

        let batch = self.source_batch(supplier_id)?.ok_or_else(|| {
            PublishError::PreconditionFailed(format!("no parsed batch for supplier {supplier_id}"))
        })?;

        let candidates: Vec<OfferCandidate> = self
            .import_repo
            .list_candidates(&batch.batch_id)?
            .into_iter()
            .filter(|c| c.validation.is_publishable())
            .collect();

        let now = Utc::now();
        let mut items: HashMap<String, Option<SupplierItem>> = HashMap::new();
        let mut offers = Vec::with_capacity(candidates.len());
        let mut skipped_unmapped = 0usize;

        for candidate in &candidates {
            let Some(mapping) = self.catalog_repo.confirmed_mapping(&candidate.item_id)? else {
                skipped_unmapped += 1;
                continue;
            };
            if !items.contains_key(&candidate.item_id) {
                let item = self.import_repo.find_item(&candidate.item_id)?;
                items.insert(candidate.item_id.clone(), item);
            }
            let Some(item) = items.get(&candidate.item_id).and_then(|i| i.as_ref()) else {
                warn!(item_id = %candidate.item_id, "候选引用的条目不存在，跳过");
                skipped_unmapped += 1;
                continue;
            };

            offers.push(Offer {
                offer_id: Uuid::new_v4().to_string(),
                supplier_id: supplier_id.to_string(),
                batch_id: batch.batch_id.clone(),
                candidate_id: candidate.candidate_id.clone(),
                item_id: candidate.item_id.clone(),
                sku_id: mapping.sku_id,
                display_title: display_title(item, candidate.length_cm),
                length_cm: candidate.length_cm,
                pack_qty: candidate.pack_qty,
                price_type: candidate.price_type,
                price_min: candidate.price_min,
                price_max: candidate.price_max,
                is_active: true,
                created_at: now,
            });
        }
        debug!(offers = offers.len(), skipped_unmapped, "报价集合已构建");

        let deactivated = self
            .offer_repo
            .replace_active_offers(supplier_id, &batch.batch_id, &offers)?;

        info!(
            batch_id = %batch.batch_id,
            deactivated,
            created = offers.len(),
            skipped_unmapped,
            "发布完成"
        );
        Ok(PublishReport {
            batch_id: batch.batch_id,
            deactivated,
            created: offers.len(),
            skipped_unmapped,
        })
    }

    /// 最近的 parsed 批次；已发布批次更新时取已发布批次（重复发布）
    fn source_batch(&self, supplier_id: &str) -> PublishResult<Option<ImportBatch>> {
        let parsed = self
            .import_repo
            .latest_batch_with_status(supplier_id, BatchStatus::Parsed)?;
        let published = self
            .import_repo
            .latest_batch_with_status(supplier_id, BatchStatus::Published)?;
        Ok(match (parsed, published) {
            (Some(p), Some(q)) => Some(if q.created_at > p.created_at { q } else { p }),
            (p, q) => p.or(q),
        })
    }
}
