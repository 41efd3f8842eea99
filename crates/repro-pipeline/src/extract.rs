//! Etapa de extracción: hosts a partir de las URLs declaradas.
//!
//! Recorre los cuatro campos de URL de cada paquete, parsea el hostname y lo
//! upsertea en `hosts` por lotes. Las URLs imparseables quedan en el log de
//! errores y no cortan el batch.

use log::info;

use repro_domain::scmurl;
use repro_persistence::{ConnectionProvider, UrlSlot, Warehouse};

use crate::error::PipelineError;

const BATCH_SIZE: usize = 1000;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractStats {
    pub parsed: usize,
    pub unparseable: usize,
}

pub struct HostExtractor<'a, P: ConnectionProvider> {
    warehouse: &'a Warehouse<P>,
}

impl<'a, P: ConnectionProvider> HostExtractor<'a, P> {
    pub fn new(warehouse: &'a Warehouse<P>) -> Self {
        HostExtractor { warehouse }
    }

    /// Procesa los cuatro slots en orden. Devuelve contadores agregados.
    pub fn extract_all(&self) -> Result<ExtractStats, PipelineError> {
        let mut stats = ExtractStats::default();
        for slot in UrlSlot::ALL {
            let slot_stats = self.extract_slot(slot)?;
            stats.parsed += slot_stats.parsed;
            stats.unparseable += slot_stats.unparseable;
        }
        info!("extract: parsed={} unparseable={}", stats.parsed, stats.unparseable);
        Ok(stats)
    }

    fn extract_slot(&self, slot: UrlSlot) -> Result<ExtractStats, PipelineError> {
        info!("extract: parseando hosts del campo {}", slot.name());
        let mut stats = ExtractStats::default();
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        for (pkg, url) in self.warehouse.package_urls(slot)? {
            match scmurl::extract_host(&url) {
                Some(host) => {
                    batch.push((pkg, url, host));
                    stats.parsed += 1;
                }
                None => {
                    self.warehouse.insert_error(&pkg, Some(&url), "(EXTRACTOR) no se pudo parsear")?;
                    stats.unparseable += 1;
                }
            }
            if batch.len() == BATCH_SIZE {
                self.warehouse.upsert_hosts(slot, &batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.warehouse.upsert_hosts(slot, &batch)?;
        }
        Ok(stats)
    }
}
