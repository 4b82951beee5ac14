use bitflags::bitflags;

bitflags! {
    /// Pad button bitmask, in the platform's native pad layout.
    ///
    /// Unknown bits are preserved (`from_bits_retain`) so masks read from
    /// config or macro files round-trip untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u64 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const STICK_L = 1 << 4;
        const STICK_R = 1 << 5;
        const L = 1 << 6;
        const R = 1 << 7;
        const ZL = 1 << 8;
        const ZR = 1 << 9;
        const PLUS = 1 << 10;
        const MINUS = 1 << 11;
        const LEFT = 1 << 12;
        const UP = 1 << 13;
        const RIGHT = 1 << 14;
        const DOWN = 1 << 15;
        // Stick-direction pseudo buttons reported alongside the analog sticks.
        const STICK_L_LEFT = 1 << 16;
        const STICK_L_UP = 1 << 17;
        const STICK_L_RIGHT = 1 << 18;
        const STICK_L_DOWN = 1 << 19;
        const STICK_R_LEFT = 1 << 20;
        const STICK_R_UP = 1 << 21;
        const STICK_R_RIGHT = 1 << 22;
        const STICK_R_DOWN = 1 << 23;
        const LEFT_SL = 1 << 24;
        const LEFT_SR = 1 << 25;
        const RIGHT_SL = 1 << 26;
        const RIGHT_SR = 1 << 27;
    }
}

/// Button names accepted in the `MAPPING` config section, in config order.
pub const REMAPPABLE_NAMES: [&str; 16] = [
    "A", "B", "X", "Y", "Up", "Down", "Left", "Right", "L", "R", "ZL", "ZR", "StickL", "StickR",
    "Start", "Select",
];

impl Buttons {
    /// Bits aliasing analog-stick directions. Never treated as real input.
    pub const STICK_PSEUDO: Buttons = Buttons::from_bits_retain(0x00FF_0000);

    /// Buttons physically present on the left half of a split pad.
    pub const LEFT_HALF: Buttons = Buttons::from_bits_retain(
        Buttons::LEFT.bits()
            | Buttons::UP.bits()
            | Buttons::RIGHT.bits()
            | Buttons::DOWN.bits()
            | Buttons::L.bits()
            | Buttons::ZL.bits()
            | Buttons::STICK_L.bits()
            | Buttons::MINUS.bits(),
    );

    /// Buttons physically present on the right half of a split pad.
    pub const RIGHT_HALF: Buttons = Buttons::from_bits_retain(
        Buttons::A.bits()
            | Buttons::B.bits()
            | Buttons::X.bits()
            | Buttons::Y.bits()
            | Buttons::R.bits()
            | Buttons::ZR.bits()
            | Buttons::STICK_R.bits()
            | Buttons::PLUS.bits(),
    );

    /// Wrap a raw mask coming from config, a macro file or the platform.
    pub const fn mask(raw: u64) -> Buttons {
        Buttons::from_bits_retain(raw)
    }

    /// Look up a single button by its config name. `Start`/`Plus` and
    /// `Select`/`Minus` are aliases.
    pub fn from_config_name(name: &str) -> Option<Buttons> {
        let button = match name {
            "A" => Buttons::A,
            "B" => Buttons::B,
            "X" => Buttons::X,
            "Y" => Buttons::Y,
            "StickL" => Buttons::STICK_L,
            "StickR" => Buttons::STICK_R,
            "L" => Buttons::L,
            "R" => Buttons::R,
            "ZL" => Buttons::ZL,
            "ZR" => Buttons::ZR,
            "Start" | "Plus" => Buttons::PLUS,
            "Select" | "Minus" => Buttons::MINUS,
            "Left" => Buttons::LEFT,
            "Up" => Buttons::UP,
            "Right" => Buttons::RIGHT,
            "Down" => Buttons::DOWN,
            _ => return None,
        };
        Some(button)
    }

    /// Config name of a single remappable button.
    pub fn config_name(self) -> Option<&'static str> {
        REMAPPABLE_NAMES
            .iter()
            .copied()
            .find(|name| Buttons::from_config_name(name) == Some(self))
    }
}

/// Analog stick position. The platform reports values in the `i16` range but
/// carries them as 32-bit integers, which is also what macro files store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StickPos {
    pub x: i32,
    pub y: i32,
}

impl StickPos {
    pub const CENTER: StickPos = StickPos { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_centered(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}
