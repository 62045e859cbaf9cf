//! フック（関数呼び出しの横取り）の境界と単発フック
//!
//! フックエンジン本体は外部から供給されます。ここでは設置と除去だけを要求し、
//! トレースが1回だけ行われるようにフックの状態遷移を管理します。

use crate::TraceError;
use tracing::{debug, warn};

/// 外部のフックエンジン
pub trait Interceptor {
    /// アドレスにフックを設置する
    fn install(&mut self, address: u64) -> crate::Result<()>;

    /// アドレスのフックを除去する（設置されていなくても成功扱い）
    fn remove(&mut self, address: u64);
}

/// フックの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// 設置済みで、次の呼び出しで発火する
    Armed,
    /// 発火して除去された
    Disarmed,
    /// トレースセッションの実行中
    Sessioned,
}

/// 1回だけ発火するフック
///
/// Armed → Disarmed → Sessioned と遷移し、rearm を呼ぶまで再び発火しません。
pub struct SingleShotHook<I: Interceptor> {
    interceptor: I,
    address: u64,
    state: HookState,
}

impl<I: Interceptor> SingleShotHook<I> {
    /// フックを設置する
    pub fn arm(mut interceptor: I, address: u64) -> Result<Self, TraceError> {
        interceptor
            .install(address)
            .map_err(|e| TraceError::HookInstallFailed {
                address,
                reason: format!("{:#}", e),
            })?;
        debug!("Hook armed at 0x{:x}", address);

        Ok(Self {
            interceptor,
            address,
            state: HookState::Armed,
        })
    }

    /// 発火したフックを除去する
    pub fn disarm(&mut self) -> Result<(), TraceError> {
        self.transition("disarm", HookState::Armed, HookState::Disarmed)?;
        self.interceptor.remove(self.address);
        Ok(())
    }

    /// トレースセッションに入る
    pub fn enter_session(&mut self) -> Result<(), TraceError> {
        self.transition("enter session for", HookState::Disarmed, HookState::Sessioned)
    }

    /// フックを再設置する
    ///
    /// Armed の状態で呼ぶとエラーになります。
    pub fn rearm(&mut self) -> Result<(), TraceError> {
        if self.state == HookState::Armed {
            return Err(TraceError::InvalidHookTransition {
                address: self.address,
                action: "rearm",
                state: self.state,
            });
        }

        self.interceptor
            .install(self.address)
            .map_err(|e| TraceError::HookInstallFailed {
                address: self.address,
                reason: format!("{:#}", e),
            })?;
        debug!("Hook at 0x{:x}: {:?} -> Armed", self.address, self.state);
        self.state = HookState::Armed;
        Ok(())
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }

    fn transition(
        &mut self,
        action: &'static str,
        from: HookState,
        to: HookState,
    ) -> Result<(), TraceError> {
        if self.state != from {
            return Err(TraceError::InvalidHookTransition {
                address: self.address,
                action,
                state: self.state,
            });
        }
        debug!("Hook at 0x{:x}: {:?} -> {:?}", self.address, from, to);
        self.state = to;
        Ok(())
    }
}

impl<I: Interceptor> Drop for SingleShotHook<I> {
    fn drop(&mut self) {
        if self.state == HookState::Armed {
            warn!("Removing still armed hook at 0x{:x}", self.address);
            self.interceptor.remove(self.address);
        }
    }
}
