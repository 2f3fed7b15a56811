//! Federated request dispatch.
//!
//! A single logical query fans out to every configured data source in
//! parallel. Successful partial responses are collected in configured
//! source order, which is the merge priority, and folded by the matching
//! merge operation. With a remote peer configured, the same request also
//! goes to the peer and its response merges as last-priority aux, so local
//! data always wins.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::errors::{Result, ServiceError};
use crate::merge;
use crate::model::{
	NodeRequest, NodeResponse, NodeSearchRequest, NodeSearchResponse, ObservationRequest,
	ObservationResponse, ResolveRequest, ResolveResponse,
};
use crate::observability::metrics;
use crate::remote::RemoteMixer;

/// Default cap on the |variables| x |entities| cross-product a single
/// observation request may expand to.
pub const DEFAULT_MAX_SERIES: usize = 5000;

/// The four operations every backend implements. Backends are opaque: the
/// gateway never sees their storage, only these typed calls.
#[async_trait]
pub trait DataSource: Send + Sync {
	/// Stable source identifier, used in logs.
	fn id(&self) -> String;

	async fn node(&self, req: &NodeRequest, page_size: i32) -> Result<NodeResponse>;

	async fn observation(&self, req: &ObservationRequest) -> Result<ObservationResponse>;

	async fn node_search(&self, req: &NodeSearchRequest) -> Result<NodeSearchResponse>;

	async fn resolve(&self, req: &ResolveRequest) -> Result<ResolveResponse>;
}

/// Fan-out coordinator over the configured data sources plus the optional
/// remote peer.
pub struct Dispatcher {
	sources: Vec<Arc<dyn DataSource>>,
	remote: Option<Arc<RemoteMixer>>,
}

impl Dispatcher {
	pub fn new(sources: Vec<Arc<dyn DataSource>>, remote: Option<Arc<RemoteMixer>>) -> Self {
		let order: Vec<String> = sources.iter().map(|s| s.id()).collect();
		log::debug!("dispatcher sources in priority order: {:?}", order);
		Self { sources, remote }
	}

	pub async fn observation(&self, req: &ObservationRequest) -> Result<ObservationResponse> {
		let mut tasks: Vec<BoxFuture<'static, Result<ObservationResponse>>> = self
			.sources
			.iter()
			.map(|source| {
				let source = source.clone();
				let req = req.clone();
				async move { source.observation(&req).await }.boxed()
			})
			.collect();
		if let Some(remote) = &self.remote {
			let remote = remote.clone();
			let req = req.clone();
			tasks.push(async move { remote.observation(&req).await }.boxed());
		}
		let responses = gather(tasks).await?;
		Ok(merge::merge_multi_observation(responses))
	}

	pub async fn node(&self, req: &NodeRequest, page_size: i32) -> Result<NodeResponse> {
		let mut tasks: Vec<BoxFuture<'static, Result<NodeResponse>>> = self
			.sources
			.iter()
			.map(|source| {
				let source = source.clone();
				let req = req.clone();
				async move { source.node(&req, page_size).await }.boxed()
			})
			.collect();
		if let Some(remote) = &self.remote {
			let remote = remote.clone();
			let req = req.clone();
			tasks.push(async move { remote.node(&req).await }.boxed());
		}
		let responses = gather(tasks).await?;
		merge::merge_multi_node(responses)
	}

	pub async fn node_search(&self, req: &NodeSearchRequest) -> Result<NodeSearchResponse> {
		let mut tasks: Vec<BoxFuture<'static, Result<NodeSearchResponse>>> = self
			.sources
			.iter()
			.map(|source| {
				let source = source.clone();
				let req = req.clone();
				async move { source.node_search(&req).await }.boxed()
			})
			.collect();
		if let Some(remote) = &self.remote {
			let remote = remote.clone();
			let req = req.clone();
			tasks.push(async move { remote.node_search(&req).await }.boxed());
		}
		let responses = gather(tasks).await?;
		Ok(merge::merge_multi_node_search(responses))
	}

	pub async fn resolve(&self, req: &ResolveRequest) -> Result<ResolveResponse> {
		let mut tasks: Vec<BoxFuture<'static, Result<ResolveResponse>>> = self
			.sources
			.iter()
			.map(|source| {
				let source = source.clone();
				let req = req.clone();
				async move { source.resolve(&req).await }.boxed()
			})
			.collect();
		if let Some(remote) = &self.remote {
			let remote = remote.clone();
			let req = req.clone();
			tasks.push(async move { remote.resolve(&req).await }.boxed());
		}
		let responses = gather(tasks).await?;
		Ok(merge::merge_multi_resolve(responses))
	}
}

/// Enforce the series cross-product cap before a contained-in expansion
/// turns into per-entity series fetches.
pub fn check_series_cap(
	variable_count: usize,
	entity_count: usize,
	max_series: usize,
) -> Result<()> {
	let product = variable_count.saturating_mul(entity_count);
	if product > max_series {
		return Err(ServiceError::InvalidArgument(format!(
			"requested {} series ({} variables x {} entities), cap is {}",
			product, variable_count, entity_count, max_series
		)));
	}
	Ok(())
}

/// Aborts the owned tasks when dropped, so cancelling the gather future
/// (first error, or the caller's context going away) cancels the whole
/// fan-out.
struct TaskScope(Vec<tokio::task::JoinHandle<()>>);

impl Drop for TaskScope {
	fn drop(&mut self) {
		for handle in &self.0 {
			handle.abort();
		}
	}
}

/// Run one task per future, collecting results back into input order so
/// source priority survives the unordered completion. The first error
/// cancels every other task and is returned; a task that dies without
/// reporting is an internal error.
async fn gather<T: Send + 'static>(
	tasks: Vec<BoxFuture<'static, Result<T>>>,
) -> Result<Vec<T>> {
	let total = tasks.len();
	if total == 0 {
		return Ok(Vec::new());
	}
	metrics::record_fan_out(total as u64);

	let (tx, mut rx) = mpsc::channel(total);
	let mut handles = Vec::with_capacity(total);
	for (index, task) in tasks.into_iter().enumerate() {
		let tx = tx.clone();
		handles.push(tokio::spawn(async move {
			let _ = tx.send((index, task.await)).await;
		}));
	}
	drop(tx);
	let _scope = TaskScope(handles);

	let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
	let mut received = 0;
	while let Some((index, result)) = rx.recv().await {
		match result {
			Ok(value) => {
				slots[index] = Some(value);
				received += 1;
			}
			Err(e) => return Err(e),
		}
	}

	if received < total {
		return Err(ServiceError::Internal(
			"a data source task exited without responding".into(),
		));
	}
	Ok(slots.into_iter().flatten().collect())
}
