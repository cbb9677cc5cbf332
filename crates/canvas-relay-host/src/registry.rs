//! Surface sessions keyed by their remote-assigned id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use canvas_relay_core::CommandError;
use canvas_relay_core::protocol::{ContextOptions, PathId, SurfaceId};
use canvas_relay_surface::{Path2d, PathTarget, Surface2d, SurfaceBackend};

/// One live drawing surface and the named paths created on it.
pub struct SurfaceSession {
    pub id: SurfaceId,
    pub surface: Box<dyn Surface2d>,
    pub paths: HashMap<PathId, Path2d>,
    pub created_at: DateTime<Utc>,
}

/// Owns every surface session. Lives as long as the host process, across
/// reconnects.
pub struct ResourceRegistry {
    backend: Box<dyn SurfaceBackend>,
    sessions: HashMap<SurfaceId, SurfaceSession>,
}

impl ResourceRegistry {
    pub fn new(backend: Box<dyn SurfaceBackend>) -> Self {
        Self {
            backend,
            sessions: HashMap::new(),
        }
    }

    /// Create a surface under `id`, replacing any live session with that id.
    pub fn create_surface(
        &mut self,
        id: SurfaceId,
        width: u32,
        height: u32,
        options: &ContextOptions,
    ) -> Result<(), CommandError> {
        let surface = self.backend.create_surface(width, height, options)?;
        let session = SurfaceSession {
            id: id.clone(),
            surface,
            paths: HashMap::new(),
            created_at: Utc::now(),
        };
        if let Some(old) = self.sessions.insert(id.clone(), session) {
            debug!(surface = %id, age_ms = (Utc::now() - old.created_at).num_milliseconds(), "Replaced live surface");
        }
        info!(surface = %id, width, height, alpha = options.alpha, "Surface created");
        Ok(())
    }

    /// Drop the session for `id`. Unknown ids are ignored.
    pub fn destroy_surface(&mut self, id: &SurfaceId) -> bool {
        match self.sessions.remove(id) {
            Some(session) => {
                info!(
                    surface = %id,
                    paths = session.paths.len(),
                    lived_ms = (Utc::now() - session.created_at).num_milliseconds(),
                    "Surface destroyed"
                );
                true
            }
            None => {
                debug!(surface = %id, "Destroy for unknown surface ignored");
                false
            }
        }
    }

    pub fn resolve_surface(&mut self, id: &SurfaceId) -> Result<&mut SurfaceSession, CommandError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| CommandError::UnknownSurface(id.clone()))
    }

    /// The named path, or the surface's default path when `path` is `None`.
    pub fn resolve_path_or_default(
        &mut self,
        id: &SurfaceId,
        path: Option<&PathId>,
    ) -> Result<PathTarget<'_>, CommandError> {
        let session = self.resolve_surface(id)?;
        match path {
            Some(path_id) => session
                .paths
                .get_mut(path_id)
                .map(PathTarget::untransformed)
                .ok_or_else(|| CommandError::UnknownPath(path_id.clone())),
            None => Ok(session.surface.default_path()),
        }
    }

    /// The surface together with the named path, if one was requested.
    pub fn resolve_path_optional(
        &mut self,
        id: &SurfaceId,
        path: Option<&PathId>,
    ) -> Result<(&mut dyn Surface2d, Option<&Path2d>), CommandError> {
        let session = self.resolve_surface(id)?;
        let named = match path {
            Some(path_id) => Some(
                session
                    .paths
                    .get(path_id)
                    .ok_or_else(|| CommandError::UnknownPath(path_id.clone()))?,
            ),
            None => None,
        };
        Ok((session.surface.as_mut(), named))
    }

    /// Start a fresh path: a new empty named path, or a reset default path.
    pub fn begin_path(&mut self, id: &SurfaceId, path: Option<PathId>) -> Result<(), CommandError> {
        let session = self.resolve_surface(id)?;
        match path {
            Some(path_id) => {
                session.paths.insert(path_id, Path2d::new());
            }
            None => session.surface.begin_path(),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}
