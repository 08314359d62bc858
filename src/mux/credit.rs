// Copyright (c) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Flow-control credit.
//!
//! Both directions of a flow-control window are plain signed balances kept
//! in `i64`, so the 31-bit overflow rule is a comparison rather than
//! wrap-around arithmetic. [`Credit`] is the send side: what the peer has
//! granted us. [`RecvCredit`] is the receive side: what we have granted
//! the peer, plus the target we top it back up to; a WINDOW_UPDATE is due
//! once less than half the target remains.

/// The largest legal flow-control window, 2^31 - 1.
pub const MAX_FLOW_CONTROL_WINDOW: u32 = (1 << 31) - 1;

/// Bytes the peer allows us to send. The balance goes negative when the
/// peer shrinks INITIAL_WINDOW_SIZE below what is already in flight.
pub(crate) struct Credit {
    balance: i64,
}

impl Credit {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            balance: initial as i64,
        }
    }

    /// Bytes that may be sent right now.
    pub(crate) fn available(&self) -> u32 {
        self.balance.clamp(0, MAX_FLOW_CONTROL_WINDOW as i64) as u32
    }

    /// Consumes credit for bytes put on the wire.
    pub(crate) fn spend(&mut self, amount: u32) {
        self.balance -= amount as i64;
    }

    /// Adds credit from a WINDOW_UPDATE. Returns `false` when the balance
    /// would pass 2^31 - 1; the caller raises the flow-control error for
    /// its scope.
    #[must_use]
    pub(crate) fn grant(&mut self, amount: u32) -> bool {
        self.shift(amount as i64)
    }

    /// Applies an INITIAL_WINDOW_SIZE delta, which may be negative. Same
    /// overflow contract as [`Credit::grant`].
    #[must_use]
    pub(crate) fn shift(&mut self, delta: i64) -> bool {
        let next = self.balance + delta;
        if next > MAX_FLOW_CONTROL_WINDOW as i64 {
            return false;
        }
        self.balance = next;
        true
    }
}

/// Bytes we allow the peer to send. `granted` is the peer's view of the
/// window; `target` is where a refill tops it back up to.
pub(crate) struct RecvCredit {
    granted: i64,
    target: i64,
}

impl RecvCredit {
    pub(crate) fn new(target: u32) -> Self {
        Self {
            granted: target as i64,
            target: target as i64,
        }
    }

    /// Accounts received payload bytes. Returns `false` when the peer
    /// sent more than it was granted.
    #[must_use]
    pub(crate) fn consume(&mut self, amount: u32) -> bool {
        if (amount as i64) > self.granted {
            return false;
        }
        self.granted -= amount as i64;
        true
    }

    /// Moves the top-up goal without granting anything; the next refill
    /// advertises the difference.
    pub(crate) fn set_target(&mut self, target: u32) {
        self.target = target as i64;
    }

    /// Applies an INITIAL_WINDOW_SIZE change the peer adjusts to by
    /// itself: the grant shifts along with the target.
    pub(crate) fn sync_initial(&mut self, target: u32) {
        let delta = target as i64 - self.target;
        self.granted += delta;
        self.target = target as i64;
    }

    /// Records a WINDOW_UPDATE the embedder sent by hand.
    pub(crate) fn advertise(&mut self, amount: u32) {
        self.granted += amount as i64;
    }

    /// Returns the increment to advertise when the peer's window has run
    /// below half the target, applying it to the balance.
    pub(crate) fn refill(&mut self) -> Option<u32> {
        if self.granted * 2 >= self.target {
            return None;
        }
        let increment = (self.target - self.granted) as u32;
        self.granted = self.target;
        Some(increment)
    }

    #[cfg(test)]
    pub(crate) fn granted(&self) -> i64 {
        self.granted
    }
}

#[cfg(test)]
mod ut_credit {
    use super::*;

    /// UT test case for `Credit` spending and granting.
    ///
    /// # Brief
    /// 1. Spends below zero and checks `available` clamps.
    /// 2. Grants credit back and checks the balance.
    #[test]
    fn ut_credit_spend_and_grant() {
        let mut credit = Credit::new(100);
        assert_eq!(credit.available(), 100);
        credit.spend(150);
        assert_eq!(credit.available(), 0);
        assert!(credit.grant(200));
        assert_eq!(credit.available(), 150);
    }

    /// UT test case for the 31-bit grant ceiling.
    ///
    /// # Brief
    /// 1. Grants up to exactly 2^31 - 1.
    /// 2. Checks one more byte of credit is rejected and the balance is
    ///    untouched.
    #[test]
    fn ut_credit_grant_ceiling() {
        let mut credit = Credit::new(MAX_FLOW_CONTROL_WINDOW - 1);
        assert!(credit.grant(1));
        assert!(!credit.grant(1));
        assert_eq!(credit.available(), MAX_FLOW_CONTROL_WINDOW);
    }

    /// UT test case for `Credit::shift`.
    ///
    /// # Brief
    /// 1. Shifts the balance down past zero and back up.
    /// 2. Checks a shift through the ceiling is rejected.
    #[test]
    fn ut_credit_shift() {
        let mut credit = Credit::new(100);
        assert!(credit.shift(-300));
        assert_eq!(credit.available(), 0);
        assert!(credit.shift(500));
        assert_eq!(credit.available(), 300);
        assert!(!credit.shift(MAX_FLOW_CONTROL_WINDOW as i64));
    }

    /// UT test case for `RecvCredit::consume` violations.
    ///
    /// # Brief
    /// 1. Consumes within the grant, then beyond it.
    /// 2. Checks the violation is reported and nothing is consumed.
    #[test]
    fn ut_recv_credit_consume() {
        let mut credit = RecvCredit::new(100);
        assert!(credit.consume(60));
        assert!(!credit.consume(60));
        assert_eq!(credit.granted(), 40);
    }

    /// UT test case for the half-target refill rule.
    ///
    /// # Brief
    /// 1. Consumes less than half the target and checks no refill is due.
    /// 2. Crosses the half mark and checks the refill restores the target.
    #[test]
    fn ut_recv_credit_refill() {
        let mut credit = RecvCredit::new(100);
        assert_eq!(credit.refill(), None);
        assert!(credit.consume(40));
        assert_eq!(credit.refill(), None);
        assert!(credit.consume(20));
        assert_eq!(credit.refill(), Some(60));
        assert_eq!(credit.granted(), 100);
    }

    /// UT test case for target growth.
    ///
    /// # Brief
    /// 1. Raises the target well above the grant with `set_target`.
    /// 2. Checks the next refill advertises the whole difference.
    #[test]
    fn ut_recv_credit_set_target() {
        let mut credit = RecvCredit::new(65535);
        credit.set_target(10 * 65535);
        assert_eq!(credit.refill(), Some(9 * 65535));
        assert_eq!(credit.refill(), None);
    }

    /// UT test case for `RecvCredit::sync_initial`.
    ///
    /// # Brief
    /// 1. Applies an initial-window change the peer self-adjusts to.
    /// 2. Checks grant and target shift together, so no refill is due.
    #[test]
    fn ut_recv_credit_sync_initial() {
        let mut credit = RecvCredit::new(100);
        assert!(credit.consume(30));
        credit.sync_initial(200);
        assert_eq!(credit.granted(), 170);
        assert_eq!(credit.refill(), None);
        credit.sync_initial(50);
        assert_eq!(credit.granted(), 20);
    }

    /// UT test case for manual advertising.
    ///
    /// # Brief
    /// 1. Consumes credit, then advertises a hand-rolled WINDOW_UPDATE.
    /// 2. Checks the grant reflects it.
    #[test]
    fn ut_recv_credit_advertise() {
        let mut credit = RecvCredit::new(100);
        assert!(credit.consume(80));
        credit.advertise(80);
        assert_eq!(credit.granted(), 100);
    }
}
