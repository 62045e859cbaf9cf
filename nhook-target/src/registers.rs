//! レジスタコンテキストの変換機能
//!
//! フック地点でキャプチャされたネイティブのレジスタコンテキストを、
//! 計装エンジンのレジスタ状態へフィールド単位でコピーします。
//! aarch64 ではリンクレジスタ・フレームポインタ・スタックポインタが
//! 汎用レジスタ配列の外にあるため、別途コピーする必要があります。

use std::fmt::Debug;

/// エンジン側レジスタ状態へのスロット単位のアクセス
///
/// スロット番号は計装エンジンのオペランド解析が返すコンテキストインデックスと一致します。
pub trait GprContext: Default + Clone + Debug {
    /// スロット数
    const SLOTS: usize;

    /// スロットの値を取得する（範囲外なら None）
    fn get(&self, idx: usize) -> Option<u64>;

    /// スロットに値を設定する（範囲外なら false）
    fn set(&mut self, idx: usize, value: u64) -> bool;
}

/// アーキテクチャごとのレジスタ変換規則
pub trait Architecture {
    /// アーキテクチャ名
    const NAME: &'static str;
    /// インデックスでコピーする汎用レジスタの数
    const GENERAL_REGS: usize;
    /// 引数渡しに使うレジスタの数
    const ARG_REGS: usize;

    /// フック地点でキャプチャされるレジスタコンテキスト
    type Captured: Clone + Debug;
    /// 計装エンジンのレジスタ状態
    type State: GprContext;

    /// キャプチャしたコンテキストをエンジンのレジスタ状態へコピーする
    fn bridge(captured: &Self::Captured, state: &mut Self::State);

    /// 呼び出し規約で index 番目の引数レジスタの値を取得する
    ///
    /// # Panics
    /// index が引数レジスタの数以上の場合（呼び出し側の契約違反）
    fn argument_at(captured: &Self::Captured, index: usize) -> u64;

    /// スタックポインタとフレームポインタを実行スタックの先頭に向ける
    fn point_stack(state: &mut Self::State, top: u64);
}

/// aarch64
#[derive(Debug, Clone, Copy)]
pub struct Aarch64;

/// aarch64 のキャプチャ済みレジスタコンテキスト
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aarch64Context {
    /// x0-x28
    pub x: [u64; 29],
    /// x29
    pub fp: u64,
    /// x30
    pub lr: u64,
    pub sp: u64,
}

/// aarch64 のエンジン側レジスタ状態
///
/// スロット: 0-28 = x0-x28, 29 = x29, 30 = lr, 31 = sp, 32 = nzcv, 33 = pc
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aarch64State {
    pub x: [u64; 29],
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
    pub nzcv: u64,
    pub pc: u64,
}

impl GprContext for Aarch64State {
    const SLOTS: usize = 34;

    fn get(&self, idx: usize) -> Option<u64> {
        match idx {
            0..=28 => Some(self.x[idx]),
            29 => Some(self.fp),
            30 => Some(self.lr),
            31 => Some(self.sp),
            32 => Some(self.nzcv),
            33 => Some(self.pc),
            _ => None,
        }
    }

    fn set(&mut self, idx: usize, value: u64) -> bool {
        let slot = match idx {
            0..=28 => &mut self.x[idx],
            29 => &mut self.fp,
            30 => &mut self.lr,
            31 => &mut self.sp,
            32 => &mut self.nzcv,
            33 => &mut self.pc,
            _ => return false,
        };
        *slot = value;
        true
    }
}

impl Architecture for Aarch64 {
    const NAME: &'static str = "aarch64";
    const GENERAL_REGS: usize = 29;
    const ARG_REGS: usize = 8;

    type Captured = Aarch64Context;
    type State = Aarch64State;

    fn bridge(captured: &Aarch64Context, state: &mut Aarch64State) {
        for (i, &value) in captured.x.iter().enumerate().take(Self::GENERAL_REGS) {
            state.set(i, value);
        }
        // x29/x30/sp は汎用レジスタ配列の外にある
        state.lr = captured.lr;
        state.fp = captured.fp;
        state.sp = captured.sp;
    }

    fn argument_at(captured: &Aarch64Context, index: usize) -> u64 {
        assert!(
            index < Self::ARG_REGS,
            "aarch64 passes only {} arguments in registers (requested {})",
            Self::ARG_REGS,
            index
        );
        captured.x[index]
    }

    fn point_stack(state: &mut Aarch64State, top: u64) {
        state.sp = top;
        state.fp = top;
    }
}

/// x86_64
#[derive(Debug, Clone, Copy)]
pub struct X86_64;

/// x86_64 のキャプチャ済みレジスタコンテキスト
///
/// general の並び: rax, rbx, rcx, rdx, rsi, rdi, r8-r15
///
/// x86_64 にはリンクレジスタが無く、戻りアドレスは rsp の指す先にある。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86_64Context {
    pub general: [u64; 14],
    pub rbp: u64,
    pub rsp: u64,
}

/// x86_64 のエンジン側レジスタ状態
///
/// スロット: 0-13 = rax, rbx, rcx, rdx, rsi, rdi, r8-r15, 14 = rbp, 15 = rsp, 16 = rip, 17 = eflags
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86_64State {
    pub general: [u64; 14],
    pub rbp: u64,
    pub rsp: u64,
    pub rip: u64,
    pub eflags: u64,
}

impl X86_64 {
    /// System V ABI の引数レジスタ（general 内のインデックス）: rdi, rsi, rdx, rcx, r8, r9
    const ARG_ORDER: [usize; 6] = [5, 4, 3, 2, 6, 7];
}

impl GprContext for X86_64State {
    const SLOTS: usize = 18;

    fn get(&self, idx: usize) -> Option<u64> {
        match idx {
            0..=13 => Some(self.general[idx]),
            14 => Some(self.rbp),
            15 => Some(self.rsp),
            16 => Some(self.rip),
            17 => Some(self.eflags),
            _ => None,
        }
    }

    fn set(&mut self, idx: usize, value: u64) -> bool {
        let slot = match idx {
            0..=13 => &mut self.general[idx],
            14 => &mut self.rbp,
            15 => &mut self.rsp,
            16 => &mut self.rip,
            17 => &mut self.eflags,
            _ => return false,
        };
        *slot = value;
        true
    }
}

impl Architecture for X86_64 {
    const NAME: &'static str = "x86_64";
    const GENERAL_REGS: usize = 14;
    const ARG_REGS: usize = 6;

    type Captured = X86_64Context;
    type State = X86_64State;

    fn bridge(captured: &X86_64Context, state: &mut X86_64State) {
        for (i, &value) in captured.general.iter().enumerate().take(Self::GENERAL_REGS) {
            state.set(i, value);
        }
        state.rbp = captured.rbp;
        state.rsp = captured.rsp;
    }

    fn argument_at(captured: &X86_64Context, index: usize) -> u64 {
        assert!(
            index < Self::ARG_REGS,
            "x86_64 passes only {} arguments in registers (requested {})",
            Self::ARG_REGS,
            index
        );
        captured.general[Self::ARG_ORDER[index]]
    }

    fn point_stack(state: &mut X86_64State, top: u64) {
        state.rsp = top;
        state.rbp = top;
    }
}

/// ビルド対象のアーキテクチャ
#[cfg(target_arch = "aarch64")]
pub type NativeArch = Aarch64;

/// ビルド対象のアーキテクチャ
#[cfg(target_arch = "x86_64")]
pub type NativeArch = X86_64;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_aarch64() -> Aarch64Context {
        let mut x = [0u64; 29];
        for (i, reg) in x.iter_mut().enumerate() {
            *reg = 0x1000 + i as u64;
        }
        Aarch64Context {
            x,
            fp: 0xfff0,
            lr: 0x7000_0000_1234,
            sp: 0xffe0,
        }
    }

    #[test]
    fn test_aarch64_bridge_copies_every_field() {
        let captured = sample_aarch64();
        let mut state = Aarch64State::default();
        state.nzcv = 0x6000_0000;

        Aarch64::bridge(&captured, &mut state);

        for i in 0..29 {
            assert_eq!(state.get(i), Some(captured.x[i]));
        }
        assert_eq!(state.fp, captured.fp);
        assert_eq!(state.lr, captured.lr);
        assert_eq!(state.sp, captured.sp);
        assert_eq!(state.get(29), Some(captured.fp));
        assert_eq!(state.get(30), Some(captured.lr));
        assert_eq!(state.get(31), Some(captured.sp));
        // ブリッジ対象外のフィールドは変更しない
        assert_eq!(state.nzcv, 0x6000_0000);
        assert_eq!(state.pc, 0);
    }

    #[test]
    fn test_aarch64_slots() {
        let mut state = Aarch64State::default();
        assert!(state.set(33, 0x4000));
        assert_eq!(state.pc, 0x4000);
        assert!(!state.set(Aarch64State::SLOTS, 1));
        assert_eq!(state.get(Aarch64State::SLOTS), None);
    }

    #[test]
    fn test_aarch64_argument_at() {
        let captured = sample_aarch64();
        assert_eq!(Aarch64::argument_at(&captured, 0), 0x1000);
        assert_eq!(Aarch64::argument_at(&captured, 7), 0x1007);
    }

    #[test]
    #[should_panic]
    fn test_aarch64_argument_out_of_range() {
        let captured = sample_aarch64();
        Aarch64::argument_at(&captured, 8);
    }

    #[test]
    fn test_aarch64_point_stack() {
        let mut state = Aarch64State::default();
        Aarch64::bridge(&sample_aarch64(), &mut state);
        Aarch64::point_stack(&mut state, 0x8000_0000);
        assert_eq!(state.sp, 0x8000_0000);
        assert_eq!(state.fp, 0x8000_0000);
        assert_eq!(state.lr, 0x7000_0000_1234);
    }

    #[test]
    fn test_x86_64_bridge_and_arguments() {
        let mut general = [0u64; 14];
        for (i, reg) in general.iter_mut().enumerate() {
            *reg = 0xa0 + i as u64;
        }
        let captured = X86_64Context {
            general,
            rbp: 0x7ffd_0010,
            rsp: 0x7ffd_0000,
        };
        let mut state = X86_64State::default();

        X86_64::bridge(&captured, &mut state);

        assert_eq!(state.general, captured.general);
        assert_eq!(state.rbp, captured.rbp);
        assert_eq!(state.rsp, captured.rsp);

        // rdi, rsi, rdx, rcx, r8, r9
        assert_eq!(X86_64::argument_at(&captured, 0), 0xa5);
        assert_eq!(X86_64::argument_at(&captured, 1), 0xa4);
        assert_eq!(X86_64::argument_at(&captured, 2), 0xa3);
        assert_eq!(X86_64::argument_at(&captured, 3), 0xa2);
        assert_eq!(X86_64::argument_at(&captured, 4), 0xa6);
        assert_eq!(X86_64::argument_at(&captured, 5), 0xa7);
    }

    #[test]
    #[should_panic]
    fn test_x86_64_argument_out_of_range() {
        X86_64::argument_at(&X86_64Context::default(), 6);
    }
}
