//! The dedicated warehouse server task (spec §4.5): owns the single
//! [`warehouse::Warehouse`] instance and answers the handful of requests
//! that touch it directly. Every other peer reaches the warehouse only
//! through this task's inbox, never the `Warehouse` type itself.

use std::sync::Arc;

use tracing::{info, warn};
use warehouse::{SellerRecord, Warehouse};

use crate::model::PeerId;
use crate::rpc::{Envelope, Request, Response};

pub struct WarehousePeer {
    pub id: PeerId,
    warehouse: Warehouse,
}

impl WarehousePeer {
    pub fn open(id: PeerId) -> warehouse::Result<Self> {
        Self::open_at(id, "seller_information.json")
    }

    pub fn open_at(id: PeerId, path: impl Into<std::path::PathBuf>) -> warehouse::Result<Self> {
        let warehouse = Warehouse::open(path)?;
        Ok(WarehousePeer { id, warehouse })
    }

    pub fn remove_file(&self) {
        self.warehouse.remove_file();
    }

    fn handle(&self, request: Request) -> Response {
        match request {
            Request::RegisterProductsWithWarehouse { record } => {
                match self.warehouse.register_products_with_warehouse(record) {
                    Ok(stored) => Response::Seller(Some(stored)),
                    Err(err) => {
                        warn!(warehouse = %self.id, %err, "failed to register products");
                        Response::Seller(None)
                    }
                }
            }
            Request::UpdateWarehouse { seller_id, item_count, buyer_id } => {
                match self.warehouse.update_warehouse(seller_id.as_str(), item_count, buyer_id.as_str()) {
                    Ok(updated) => Response::Seller(updated),
                    Err(err) => {
                        warn!(warehouse = %self.id, %err, "commit failed");
                        Response::Seller(None)
                    }
                }
            }
            Request::Restock { seller_id, product_name, product_count } => {
                self.restock(seller_id.as_str(), product_name, product_count);
                Response::Ack
            }
            Request::LoadState => Response::Snapshot(self.warehouse.snapshot()),
            Request::IsServer => Response::Bool(true),
            Request::PingReply => Response::Bool(true),
            _ => Response::Ack,
        }
    }

    pub fn restock(&self, seller_id: &str, product_name: impl Into<String>, product_count: u32) {
        if let Err(err) = self.warehouse.restock(seller_id, product_name, product_count) {
            warn!(warehouse = %self.id, %err, "restock failed to persist");
        }
    }

    pub fn get(&self, seller_id: &str) -> Option<SellerRecord> {
        self.warehouse.get(seller_id)
    }
}

/// Runs the warehouse's inbox loop until the channel is closed at shutdown.
pub async fn run(peer: Arc<WarehousePeer>, mut rx: tokio::sync::mpsc::Receiver<Envelope>) {
    info!(warehouse = %peer.id, "warehouse peer online");
    while let Some(envelope) = rx.recv().await {
        let response = peer.handle(envelope.request);
        let _ = envelope.reply.send(response);
    }
    info!(warehouse = %peer.id, "warehouse peer shutting down");
}
