use super::*;

impl App {
    /// Validates the prompt and starts a request, unless one is already in flight.
    pub(super) fn submit_prompt(&mut self) {
        if self.is_running() {
            self.last_status = "a request is already running (Esc to cancel)".to_string();
            return;
        }
        let request = match CompletionRequest::build(&self.input, &self.settings, &self.tones) {
            Ok(request) => request,
            Err(err) => {
                self.error = Some(err.to_string());
                return;
            }
        };
        self.error = None;
        self.push_entry(TranscriptEntry::Prompt(request.text.clone()));
        self.start_generation(request);
    }

    fn start_generation(&mut self, request: CompletionRequest) {
        let id = self.last_request_id.next();
        self.last_request_id = id;
        self.in_flight = Some(id);
        self.run_started_at = Some(Instant::now());
        self.spinner_idx = 0;
        self.last_status = "generating".to_string();
        info!(request = id.0, tones = request.tones.len(), "generation started");

        let client = Arc::clone(&self.client);
        let tx = self.events_tx.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| client.complete(&request)));
            let event = match outcome {
                Ok(result) => WorkerEvent::Finished {
                    id,
                    result,
                    elapsed: started.elapsed(),
                },
                Err(_) => WorkerEvent::Failed {
                    id,
                    reason: "worker panicked".to_string(),
                },
            };
            // The app may already be gone on quit.
            let _ = tx.send(event);
        });
    }

    /// Drains worker replies. Returns true when anything visible changed.
    pub(super) fn poll_worker(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => changed |= self.handle_worker_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.is_running() {
                        self.fail_request("worker channel closed");
                        changed = true;
                    }
                    break;
                }
            }
        }
        changed
    }

    pub(super) fn handle_worker_event(&mut self, event: WorkerEvent) -> bool {
        let id = match &event {
            WorkerEvent::Finished { id, .. } | WorkerEvent::Failed { id, .. } => *id,
        };
        if self.in_flight != Some(id) {
            debug!(request = id.0, "discarding stale reply");
            return false;
        }
        match event {
            WorkerEvent::Finished {
                result: Ok(generation),
                elapsed,
                ..
            } => {
                self.finish_request();
                match self.session.apply(generation, elapsed) {
                    Ok(report) => {
                        info!(
                            request = id.0,
                            cards = report.cards.len(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "generation finished"
                        );
                        self.show_report(report);
                    }
                    Err(err) => self.fail_request(&err.to_string()),
                }
            }
            WorkerEvent::Finished {
                result: Err(err), ..
            } => self.fail_request(&err.to_string()),
            WorkerEvent::Failed { reason, .. } => self.fail_request(&reason),
        }
        true
    }

    /// Abandons the in-flight request; its reply will be discarded as stale.
    pub(super) fn cancel_request(&mut self) {
        let Some(id) = self.in_flight else {
            return;
        };
        info!(request = id.0, "generation cancelled");
        self.finish_request();
        self.push_system("request cancelled");
    }

    fn fail_request(&mut self, reason: &str) {
        warn!(reason, "generation failed");
        self.finish_request();
        self.error = Some(GENERIC_ERROR.to_string());
        self.push_entry(TranscriptEntry::Error(GENERIC_ERROR.to_string()));
    }

    /// Single exit from the loading state, whatever the outcome.
    fn finish_request(&mut self) {
        self.in_flight = None;
        self.run_started_at = None;
        self.last_status = "ready".to_string();
    }

    pub(super) fn elapsed_label(&self) -> Option<String> {
        let started = self.run_started_at?;
        Some(format!("{:.1}s", started.elapsed().as_secs_f64()))
    }
}
