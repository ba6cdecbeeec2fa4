//! Flash-pattern stimulation (P300-style)
//!
//! One long-running routine iterates a flash plan and ends the run itself
//! when the plan is exhausted; there is no constant epoch cadence. Every
//! flash onset emits a `p300,s` or `p300,m` event marker. The context-aware
//! plans re-derive the camera-visible subset every repeat and order or group
//! flashes by screen-space separation so adjacent targets never dominate.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::warn;

use stim_types::EventMarker;

use crate::config::{EngineConfig, FlashConfig, FlashPlan};
use crate::error::{EngineError, EngineResult};
use crate::graph::{partition, TourScheduler};
use crate::modes::{Paradigm, ParadigmKind, RunEnd};
use crate::runner::RunContext;
use crate::sequence;

pub struct FlashParadigm {
    config: FlashConfig,
    tour: TourScheduler,
}

impl FlashParadigm {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.flash.clone(),
            tour: TourScheduler::new(),
        }
    }

    fn on_time(&self) -> Duration {
        Duration::from_secs_f32(self.config.on_time_s.max(0.0))
    }

    fn off_time(&self) -> Duration {
        Duration::from_secs_f32(self.config.off_time_s.max(0.0))
    }

    /// Light `targets`, emit the onset marker, hold for the on time, then
    /// darken and hold for the off time. Returns false on cancellation.
    async fn flash(
        &self,
        cx: &RunContext,
        marker: EventMarker,
        targets: &[usize],
    ) -> bool {
        for &index in targets {
            cx.pool().start_stimulus(index);
        }
        cx.emit(marker).await;
        if !cx.wait(self.on_time()).await {
            return false;
        }
        for &index in targets {
            cx.pool().stop_stimulus(index);
        }
        cx.wait(self.off_time()).await
    }

    async fn drive_single(&self, cx: &RunContext) -> EngineResult<RunEnd> {
        let size = cx.pool_size();
        if size == 0 {
            warn!("flash plan requested on an empty pool");
            return Ok(RunEnd::Exhausted);
        }
        let order = sequence::generate(size * self.config.repeats, 0, size as i32 - 1)?;
        for &index in &order {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            let marker = EventMarker::SingleFlash {
                pool_size: size,
                train_target: cx.train_target(),
                active: index as usize,
            };
            if !self.flash(cx, marker, &[index as usize]).await {
                return Ok(RunEnd::Cancelled);
            }
        }
        Ok(RunEnd::Exhausted)
    }

    async fn drive_row_column(&self, cx: &RunContext) -> EngineResult<RunEnd> {
        let size = cx.pool_size();
        if size == 0 {
            warn!("flash plan requested on an empty pool");
            return Ok(RunEnd::Exhausted);
        }
        let (rows, cols) = grid_dims(&self.config, size)?;
        for _ in 0..self.config.repeats {
            let firings =
                sequence::generate(rows + cols, 0, (rows + cols) as i32 - 1)?;
            for &firing in &firings {
                if cx.is_cancelled() {
                    return Ok(RunEnd::Cancelled);
                }
                let firing = firing as usize;
                let active = if firing < rows {
                    grid_row(firing, cols, size)
                } else {
                    grid_col(firing - rows, rows, cols, size)
                };
                if active.is_empty() {
                    continue;
                }
                let marker = EventMarker::MultiFlash {
                    pool_size: size,
                    train_target: cx.train_target(),
                    active: active.clone(),
                };
                if !self.flash(cx, marker, &active).await {
                    return Ok(RunEnd::Cancelled);
                }
            }
        }
        Ok(RunEnd::Exhausted)
    }

    async fn drive_checkerboard(&self, cx: &RunContext) -> EngineResult<RunEnd> {
        let size = cx.pool_size();
        if size == 0 {
            warn!("flash plan requested on an empty pool");
            return Ok(RunEnd::Exhausted);
        }
        let (_rows, cols) = grid_dims(&self.config, size)?;
        for _ in 0..self.config.repeats {
            // Reshuffled every full cycle; the parity rule below decides the
            // colors over the shuffled layout.
            let mut perm: Vec<usize> = (0..size).collect();
            perm.shuffle(&mut rand::thread_rng());
            let mut black = Vec::new();
            let mut white = Vec::new();
            for (position, &index) in perm.iter().enumerate() {
                let (r, c) = (position / cols, position % cols);
                if (r + c) % 2 == 0 {
                    black.push(index);
                } else {
                    white.push(index);
                }
            }
            for color in [&black, &white] {
                if color.is_empty() {
                    continue;
                }
                match self.flash_virtual_grid(cx, color, cols, size).await? {
                    RunEnd::Cancelled => return Ok(RunEnd::Cancelled),
                    RunEnd::Exhausted => {}
                }
            }
        }
        Ok(RunEnd::Exhausted)
    }

    /// Fire the rows and columns of one color's virtual grid in random
    /// order.
    async fn flash_virtual_grid(
        &self,
        cx: &RunContext,
        members: &[usize],
        cols: usize,
        pool_size: usize,
    ) -> EngineResult<RunEnd> {
        let vrows = (members.len() + cols - 1) / cols;
        let firings = sequence::generate(vrows + cols, 0, (vrows + cols) as i32 - 1)?;
        for &firing in &firings {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            let firing = firing as usize;
            let active: Vec<usize> = if firing < vrows {
                grid_row(firing, cols, members.len())
                    .into_iter()
                    .map(|i| members[i])
                    .collect()
            } else {
                grid_col(firing - vrows, vrows, cols, members.len())
                    .into_iter()
                    .map(|i| members[i])
                    .collect()
            };
            if active.is_empty() {
                continue;
            }
            let marker = EventMarker::MultiFlash {
                pool_size,
                train_target: cx.train_target(),
                active: active.clone(),
            };
            if !self.flash(cx, marker, &active).await {
                return Ok(RunEnd::Cancelled);
            }
        }
        Ok(RunEnd::Exhausted)
    }

    async fn drive_context_single(&mut self, cx: &RunContext) -> EngineResult<RunEnd> {
        for _ in 0..self.config.repeats {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            let visible = cx.pool().visible_entries();
            if visible.is_empty() {
                warn!("no visible targets, skipping repeat");
                if !cx.wait(self.on_time() + self.off_time()).await {
                    return Ok(RunEnd::Cancelled);
                }
                continue;
            }
            cx.set_selection_view(Some(visible.iter().map(|v| v.1).collect()));
            let weights = separation_weights(&visible);
            let tour = self.tour.next_tour(&mut rand::thread_rng(), &weights);
            for node in tour {
                if cx.is_cancelled() {
                    return Ok(RunEnd::Cancelled);
                }
                let marker = EventMarker::SingleFlash {
                    pool_size: visible.len(),
                    train_target: cx.train_target(),
                    active: node,
                };
                if !self.flash(cx, marker, &[visible[node].0]).await {
                    return Ok(RunEnd::Cancelled);
                }
            }
        }
        Ok(RunEnd::Exhausted)
    }

    async fn drive_context_multi(&mut self, cx: &RunContext) -> EngineResult<RunEnd> {
        for _ in 0..self.config.repeats {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            let visible = cx.pool().visible_entries();
            if visible.is_empty() {
                warn!("no visible targets, skipping repeat");
                if !cx.wait(self.on_time() + self.off_time()).await {
                    return Ok(RunEnd::Cancelled);
                }
                continue;
            }
            cx.set_selection_view(Some(visible.iter().map(|v| v.1).collect()));
            let weights = separation_weights(&visible);
            let (group_a, group_b) = partition(&weights);
            for group in [group_a, group_b] {
                if group.is_empty() {
                    continue;
                }
                if cx.is_cancelled() {
                    return Ok(RunEnd::Cancelled);
                }
                let targets: Vec<usize> = group.iter().map(|&node| visible[node].0).collect();
                let marker = EventMarker::MultiFlash {
                    pool_size: visible.len(),
                    train_target: cx.train_target(),
                    active: group,
                };
                if !self.flash(cx, marker, &targets).await {
                    return Ok(RunEnd::Cancelled);
                }
            }
        }
        Ok(RunEnd::Exhausted)
    }
}

#[async_trait]
impl Paradigm for FlashParadigm {
    fn kind(&self) -> ParadigmKind {
        ParadigmKind::FlashPattern
    }

    fn prepare(&mut self, cx: &RunContext) -> EngineResult<()> {
        // Grid geometry problems are setup errors, not mid-run surprises.
        if matches!(self.config.plan, FlashPlan::RowColumn | FlashPlan::Checkerboard) {
            let size = cx.pool_size();
            if size > 0 {
                grid_dims(&self.config, size)?;
            }
        }
        Ok(())
    }

    async fn drive(&mut self, cx: &RunContext) -> EngineResult<RunEnd> {
        match self.config.plan {
            FlashPlan::Single => self.drive_single(cx).await,
            FlashPlan::RowColumn => self.drive_row_column(cx).await,
            FlashPlan::Checkerboard => self.drive_checkerboard(cx).await,
            FlashPlan::ContextAwareSingle => self.drive_context_single(cx).await,
            FlashPlan::ContextAwareMulti => self.drive_context_multi(cx).await,
        }
    }
}

/// Resolve the configured grid, deriving a near-square layout when
/// unconfigured.
fn grid_dims(config: &FlashConfig, pool_size: usize) -> EngineResult<(usize, usize)> {
    if config.rows == 0 || config.cols == 0 {
        let rows = (pool_size as f32).sqrt().floor().max(1.0) as usize;
        let cols = (pool_size + rows - 1) / rows;
        return Ok((rows, cols));
    }
    if config.rows * config.cols < pool_size {
        return Err(EngineError::GridTooSmall {
            rows: config.rows,
            cols: config.cols,
            pool_size,
        });
    }
    Ok((config.rows, config.cols))
}

/// Pool indices of one grid row, clipped to the pool size.
fn grid_row(row: usize, cols: usize, size: usize) -> Vec<usize> {
    (row * cols..(row + 1) * cols).filter(|&i| i < size).collect()
}

/// Pool indices of one grid column, clipped to the pool size.
fn grid_col(col: usize, rows: usize, cols: usize, size: usize) -> Vec<usize> {
    (0..rows)
        .map(|row| row * cols + col)
        .filter(|&i| i < size)
        .collect()
}

/// Pairwise screen-space separation over the visible subset.
fn separation_weights(visible: &[(usize, stim_types::ObjectId, [f32; 2])]) -> Vec<Vec<f32>> {
    let n = visible.len();
    let mut weights = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let [xi, yi] = visible[i].2;
            let [xj, yj] = visible[j].2;
            let distance = ((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt();
            weights[i][j] = distance;
            weights[j][i] = distance;
        }
    }
    weights
}
