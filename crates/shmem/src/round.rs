//! The lockstep round protocol shared by value and frame channels.
//!
//! One round is one publish-then-fully-drain cycle. The producer writes the
//! payload under the mutex, then opens the `ready` gate with one permit per
//! registered consumer and posts `published` the same number of times. Each
//! consumer consumes one `ready` permit, enters the critical section to
//! copy/attach the payload and record its arrival, and the last arrival
//! signals `drain`, releasing the producer for the next round. A consumer
//! must then also observe `published` before its copy counts as valid.
//!
//! The consumer side is a two-state machine (`AwaitingData`,
//! `AwaitingConfirmation`): a confirmation timeout leaves the state sticky,
//! so a retried call skips straight to the `published` wait and never
//! re-enters the critical section or double-consumes a `ready` permit.

use crate::errors::ChannelError;
use crate::gate::GateSet;
use crate::names;
use crate::segment::Segment;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AwaitingData,
    AwaitingConfirmation,
}

/// Producer half: segment + gates + the single-writer token.
pub(crate) struct WriterCore {
    pub segment: Segment,
    pub gates: GateSet,
    channel: String,
    awaiting_drain: bool,
    claimed: bool,
}

impl WriterCore {
    pub fn bind(channel: &str, min_len: usize) -> Result<Self, ChannelError> {
        names::validate(channel)?;

        let segment = Segment::open_or_create(names::segment_path(channel), min_len)?;
        segment.ensure_header()?;
        let gates = GateSet::ensure(channel)?;

        let mut core = Self {
            segment,
            gates,
            channel: channel.to_string(),
            awaiting_drain: false,
            claimed: false,
        };
        core.claim_writer_token()?;
        Ok(core)
    }

    /// Claim the single-writer token, taking over a token left behind by a
    /// producer process that no longer exists.
    fn claim_writer_token(&mut self) -> Result<(), ChannelError> {
        let pid = std::process::id();
        let header = self.segment.header();

        let mut current = 0u32;
        loop {
            match header.producer_pid.compare_exchange(
                current,
                pid,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.claimed = true;
                    return Ok(());
                }
                Err(holder) => {
                    if holder != 0 && process_alive(holder) {
                        return Err(ChannelError::ProducerAttached(self.channel.clone()));
                    }
                    tracing::warn!(
                        channel = %self.channel,
                        stale_pid = holder,
                        "Taking over writer token from dead producer"
                    );
                    current = holder;
                }
            }
        }
    }

    /// Wait for the previous round to drain. `Ok(false)` on timeout: nothing
    /// has been written, the caller should retry the whole publish later.
    pub fn await_drain(&mut self, timeout: Duration) -> Result<bool, ChannelError> {
        if self.awaiting_drain {
            if !self.gates.drain.timed_wait(timeout)? {
                return Ok(false);
            }
            self.awaiting_drain = false;
        }
        Ok(true)
    }

    /// Run one producer round: write the payload under the mutex, snapshot
    /// the participant count, then open the gates with exactly that many
    /// permits. Caller must have observed the previous drain first.
    pub fn publish_round(
        &mut self,
        write: impl FnOnce(&mut Segment) -> Result<(), ChannelError>,
    ) -> Result<(), ChannelError> {
        self.gates.mutex.wait()?;

        if let Err(e) = write(&mut self.segment) {
            self.gates.mutex.post()?;
            return Err(e);
        }

        let header = self.segment.header();
        let expected = header.participant_count.load(Ordering::Acquire);
        header.round_arrivals.store(0, Ordering::Release);
        header.round_expected.store(expected, Ordering::Release);
        header
            .round_open
            .store(u32::from(expected > 0), Ordering::Release);
        header.round_id.fetch_add(1, Ordering::AcqRel);

        self.gates.mutex.post()?;

        for _ in 0..expected {
            self.gates.ready.post()?;
        }
        for _ in 0..expected {
            self.gates.published.post()?;
        }

        self.awaiting_drain = expected > 0;
        Ok(())
    }
}

impl Drop for WriterCore {
    fn drop(&mut self) {
        if self.claimed {
            let pid = std::process::id();
            let _ = self.segment.header().producer_pid.compare_exchange(
                pid,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

/// Consumer half: segment + gates + the sticky round phase.
pub(crate) struct ReaderCore {
    pub segment: Segment,
    pub gates: GateSet,
    phase: Phase,
    /// Round id of the last round this consumer arrived in, or of the round
    /// that was in flight when it joined (which does not include it).
    last_arrival_round: u64,
    joined: bool,
}

impl ReaderCore {
    /// Attach to the channel and register as a participant. Registration
    /// takes effect when the producer snapshots the count at its next
    /// publish; an in-flight round is unaffected.
    pub fn join(channel: &str, min_len: usize) -> Result<Self, ChannelError> {
        names::validate(channel)?;

        let segment = Segment::open_or_create(names::segment_path(channel), min_len)?;
        segment.ensure_header()?;
        let gates = GateSet::ensure(channel)?;

        gates.mutex.wait()?;
        let header = segment.header();
        let count = header.participant_count.fetch_add(1, Ordering::AcqRel) + 1;
        // If a round is open right now, its snapshot predates us; mark it
        // as settled so leave() never debits us against it.
        let last_arrival_round = header.round_id.load(Ordering::Acquire);
        gates.mutex.post()?;

        tracing::debug!(channel, participants = count, "Joined channel");

        Ok(Self {
            segment,
            gates,
            phase: Phase::AwaitingData,
            last_arrival_round,
            joined: true,
        })
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.phase == Phase::AwaitingConfirmation
    }

    /// Protocol step 1: pass the ready gate and run the critical section.
    ///
    /// `stage` runs under the mutex and must capture whatever the caller
    /// needs from the segment (a value copy, a frame descriptor); it must
    /// not block. Returns `Ok(None)` on gate timeout with no side effects.
    pub fn try_begin<R>(
        &mut self,
        timeout: Duration,
        stage: impl FnOnce(&mut Segment) -> R,
    ) -> Result<Option<R>, ChannelError> {
        debug_assert_eq!(self.phase, Phase::AwaitingData);

        if !self.gates.ready.timed_wait(timeout)? {
            return Ok(None);
        }
        // Permit consumed: from here we owe the round an arrival, and the
        // sticky phase guarantees a later timeout retries only step 2.
        self.phase = Phase::AwaitingConfirmation;

        self.gates.mutex.wait()?;
        let staged = stage(&mut self.segment);

        let header = self.segment.header();
        self.last_arrival_round = header.round_id.load(Ordering::Acquire);
        let arrival = header.record_arrival(&self.gates.drain);
        self.gates.mutex.post()?;
        arrival?;

        Ok(Some(staged))
    }

    /// Protocol step 2: observe the published signal confirming the staged
    /// copy/attachment is valid. `Ok(false)` on timeout; the phase stays
    /// sticky so the next call retries only this step.
    pub fn try_confirm(&mut self, timeout: Duration) -> Result<bool, ChannelError> {
        debug_assert_eq!(self.phase, Phase::AwaitingConfirmation);

        if !self.gates.published.timed_wait(timeout)? {
            return Ok(false);
        }
        self.phase = Phase::AwaitingData;
        Ok(true)
    }

    /// Deregister. If a round is in flight and this consumer is part of its
    /// snapshot but has not arrived, the round's expectation is shrunk and
    /// this consumer's unconsumed permits are withdrawn, so the barrier
    /// drains instead of stalling permanently.
    pub fn leave(&mut self) -> Result<(), ChannelError> {
        if !self.joined {
            return Ok(());
        }
        self.joined = false;

        self.gates.mutex.wait()?;
        let header = self.segment.header();
        let remaining = header
            .participant_count
            .load(Ordering::Acquire)
            .saturating_sub(1);
        header.participant_count.store(remaining, Ordering::Release);

        // Whether we ever arrived at the open round is independent of the
        // phase: a consumer stuck awaiting confirmation of an earlier round
        // is still counted in the open round's snapshot.
        let round_is_open = header.round_open.load(Ordering::Acquire) != 0;
        let arrived_at_open_round =
            self.last_arrival_round == header.round_id.load(Ordering::Acquire);

        if round_is_open && !arrived_at_open_round {
            // Counted in the snapshot but never arrived: shrink the round
            // and withdraw our permits.
            let expected = header
                .round_expected
                .load(Ordering::Acquire)
                .saturating_sub(1);
            header.round_expected.store(expected, Ordering::Release);
            let _ = self.gates.ready.try_wait();
            let _ = self.gates.published.try_wait();

            if header.round_arrivals.load(Ordering::Acquire) == expected {
                header.round_arrivals.store(0, Ordering::Release);
                header.round_open.store(0, Ordering::Release);
                self.gates.drain.post()?;
            }
        }

        if self.phase == Phase::AwaitingConfirmation {
            // The unobserved published permit of the round we did arrive at
            // is still outstanding.
            let _ = self.gates.published.try_wait();
        }

        self.gates.mutex.post()?;
        tracing::debug!(participants = remaining, "Left channel");
        Ok(())
    }
}

impl Drop for ReaderCore {
    fn drop(&mut self) {
        if let Err(e) = self.leave() {
            tracing::warn!(error = %e, "Failed to deregister from channel");
        }
    }
}

fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 || nix::errno::Errno::last() != nix::errno::Errno::ESRCH }
}
