// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-lock leader election: a single host directory, shared by every
//! replica that could run this `agent_id`, holds one advisory lock file.
//! Whichever process holds the exclusive `flock` is leader. Suited to a
//! single-host deployment where replicas are separate processes on the
//! same filesystem rather than separate hosts.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use fs2::FileExt;

use crate::error::ElectionError;
use crate::LeaderElector;

pub struct FileLockBackend {
    lock_path: PathBuf,
    holder_id: String,
    file: Mutex<Option<File>>,
}

impl FileLockBackend {
    pub fn new(lock_path: PathBuf, holder_id: impl Into<String>) -> Self {
        Self { lock_path, holder_id: holder_id.into(), file: Mutex::new(None) }
    }
}

#[async_trait]
impl LeaderElector for FileLockBackend {
    async fn try_acquire(&self) -> Result<bool, ElectionError> {
        let lock_path = self.lock_path.clone();
        let holder_id = self.holder_id.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<Option<File>, ElectionError> {
            if let Some(parent) = lock_path.parent() {
                std::fs::create_dir_all(parent)?;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))?;
            }
            // Open without truncating first so a failed lock attempt never
            // wipes the current holder's file.
            let mut file = OpenOptions::new().write(true).create(true).truncate(false).open(&lock_path)?;
            file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    file.set_len(0)?;
                    writeln!(file, "{holder_id}")?;
                    file.flush()?;
                    Ok(Some(file))
                }
                Err(_) => Ok(None),
            }
        })
        .await
        .map_err(|e| ElectionError::Backend(e.to_string()))??;

        match result {
            Some(file) => {
                *self.file.lock().map_err(|_| ElectionError::Backend("lock poisoned".into()))? =
                    Some(file);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn renew(&self) -> Result<(), ElectionError> {
        // Holding the OS-level flock *is* the lease; as long as the handle
        // is open and the lock wasn't stolen, we're still leader. An flock
        // cannot be taken over while the file descriptor stays open, so a
        // missing handle is the only failure mode.
        let held = self.file.lock().map_err(|_| ElectionError::Backend("lock poisoned".into()))?.is_some();
        if held {
            Ok(())
        } else {
            Err(ElectionError::LostOwnership)
        }
    }

    async fn release(&self) -> Result<(), ElectionError> {
        let mut guard = self.file.lock().map_err(|_| ElectionError::Backend("lock poisoned".into()))?;
        if let Some(file) = guard.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
        Ok(())
    }

    async fn get_leader(&self) -> Result<Option<String>, ElectionError> {
        match std::fs::read_to_string(&self.lock_path) {
            Ok(contents) => Ok(Some(contents.trim().to_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ElectionError::Io(e)),
        }
    }

    async fn close(&self) -> Result<(), ElectionError> {
        self.release().await
    }
}

#[cfg(test)]
#[path = "file_lock_tests.rs"]
mod tests;
