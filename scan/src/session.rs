//! Shared ownership of one stage/camera pair.
//!
//! Interactive commands reach the stage through the command channel; the
//! exclusive-ownership runs (autofocus, raster, leveling, focus stack) lock
//! the devices here for their whole duration. The session mutex, not UI
//! state, enforces the "at most one exclusive run" invariant.

use crate::error::{ScanError, ScanResult};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Owns the stage and camera handles for one physical device pair.
pub struct DeviceSession<S, C> {
    stage: Arc<Mutex<S>>,
    camera: Arc<Mutex<C>>,
}

impl<S, C> DeviceSession<S, C> {
    pub fn new(stage: S, camera: C) -> Self {
        Self {
            stage: Arc::new(Mutex::new(stage)),
            camera: Arc::new(Mutex::new(camera)),
        }
    }

    /// Handle for the command channel's consumer thread. Each interactive
    /// command locks the stage only for its own execution.
    pub fn stage_handle(&self) -> Arc<Mutex<S>> {
        self.stage.clone()
    }

    /// Claim both devices for an exclusive run.
    ///
    /// Fails immediately if another exclusive run holds them; interactive
    /// channel commands issued meanwhile block until the guard drops.
    pub fn try_exclusive(&self) -> ScanResult<ExclusiveRun<'_, S, C>> {
        let stage = lock_or_busy(&self.stage, "stage")?;
        let camera = lock_or_busy(&self.camera, "camera")?;
        Ok(ExclusiveRun { stage, camera })
    }
}

fn lock_or_busy<'a, T>(mutex: &'a Mutex<T>, what: &str) -> ScanResult<MutexGuard<'a, T>> {
    match mutex.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(ScanError::DeviceUnavailable(format!(
            "{what} is held by another exclusive run"
        ))),
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
    }
}

/// Guard granting sole access to the stage and camera until dropped.
pub struct ExclusiveRun<'a, S, C> {
    stage: MutexGuard<'a, S>,
    camera: MutexGuard<'a, C>,
}

impl<S, C> ExclusiveRun<'_, S, C> {
    pub fn devices(&mut self) -> (&mut S, &mut C) {
        (&mut self.stage, &mut self.camera)
    }

    pub fn stage(&mut self) -> &mut S {
        &mut self.stage
    }

    pub fn camera(&mut self) -> &mut C {
        &mut self.camera
    }
}
