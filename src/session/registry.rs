use super::*;

impl SessionRegistry<SshTransport> {
    /// Creates an empty registry that connects through [`SshTransport`] defaults.
    pub fn new() -> Self {
        Self::with_transport(SshTransport::default())
    }
}

impl Default for SessionRegistry<SshTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SessionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            link: self.link.clone(),
        }
    }
}

impl<T: Transport> SessionRegistry<T> {
    /// Creates an empty registry that opens shells through `transport`.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            link: RegistryLink::default(),
        }
    }

    /// Opens a shell on `host` and registers it.
    ///
    /// The host's slot is reserved before the handshake starts, so a
    /// concurrent `connect` for the same host fails with
    /// [`ConnectError::Busy`] immediately instead of racing the handshake.
    /// The reservation is given back if the handshake fails or this future
    /// is dropped.
    pub async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Session<T::Handle>, ConnectError> {
        let reservation = self.link.reserve(host)?;
        debug!("{} Slot reserved, opening shell...", host);

        let streams = self.transport.open_shell(host, user, password).await?;
        let id = reservation.commit();
        debug!("{} Shell registered as session {}", host, id);

        Ok(Session::new(host.to_string(), id, streams, self.link.clone()))
    }

    /// Opens a shell like [`connect`](Self::connect) and attaches a recorder to it.
    pub async fn connect_with_recording(
        &self,
        host: &str,
        user: &str,
        password: &str,
        level: SessionRecordLevel,
    ) -> Result<(Session<T::Handle>, SessionRecorder), ConnectError> {
        let recorder = SessionRecorder::new(level);
        let session = self
            .connect(host, user, password)
            .await?
            .with_recorder(recorder.clone());
        let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
            host: host.to_string(),
        });
        Ok((session, recorder))
    }

    /// Unconditionally forgets `host`. Removing an absent host is a no-op.
    pub fn remove(&self, host: &str) {
        self.link.remove(host);
    }

    /// Whether `host` currently has a live or connecting session.
    pub fn is_busy(&self, host: &str) -> bool {
        self.link.with_slots(|slots| slots.hosts.contains_key(host))
    }

    /// Hosts with a live session, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts = self.link.with_slots(|slots| {
            slots
                .hosts
                .iter()
                .filter(|(_, slot)| slot.live)
                .map(|(host, _)| host.clone())
                .collect::<Vec<_>>()
        });
        hosts.sort();
        hosts
    }

    /// Number of occupied slots, connecting ones included.
    pub fn len(&self) -> usize {
        self.link.with_slots(|slots| slots.hosts.len())
    }

    /// True when no host is connected or connecting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryLink {
    // The map is never left half-updated, so a poisoned lock is still usable.
    fn with_slots<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> R {
        let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Check-then-insert under one lock.
    fn reserve(&self, host: &str) -> Result<Reservation, ConnectError> {
        let id = self.with_slots(|slots| {
            if slots.hosts.contains_key(host) {
                return Err(ConnectError::Busy(host.to_string()));
            }
            slots.next_id += 1;
            let id = slots.next_id;
            slots
                .hosts
                .insert(host.to_string(), Slot { id, live: false });
            Ok(id)
        })?;

        Ok(Reservation {
            link: self.clone(),
            host: host.to_string(),
            id,
            committed: false,
        })
    }

    fn remove(&self, host: &str) {
        if self.with_slots(|slots| slots.hosts.remove(host)).is_some() {
            debug!("{} Removed from registry", host);
        }
    }

    /// Frees the slot only if it still belongs to session `id`.
    pub(crate) fn release(&self, host: &str, id: u64) {
        let released = self.with_slots(|slots| match slots.hosts.get(host) {
            Some(slot) if slot.id == id => slots.hosts.remove(host).is_some(),
            _ => false,
        });
        if released {
            debug!("{} Session {} released its slot", host, id);
        }
    }
}

/// A reserved, not yet live, registry slot.
struct Reservation {
    link: RegistryLink,
    host: String,
    id: u64,
    committed: bool,
}

impl Reservation {
    fn commit(mut self) -> u64 {
        let id = self.id;
        self.link.with_slots(|slots| {
            if let Some(slot) = slots.hosts.get_mut(&self.host)
                && slot.id == id
            {
                slot.live = true;
            }
        });
        self.committed = true;
        id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            debug!("{} Connect abandoned, releasing reservation", self.host);
            self.link.release(&self.host, self.id);
        }
    }
}
