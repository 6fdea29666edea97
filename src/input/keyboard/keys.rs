//! Virtual-key display names

/// Human-readable name for a Windows virtual-key code
pub fn key_name(vk_code: u8) -> String {
    match vk_code {
        b'0'..=b'9' | b'A'..=b'Z' => (vk_code as char).to_string(),
        0x60..=0x69 => format!("Num {}", vk_code - 0x60),
        0x70..=0x87 => format!("F{}", vk_code - 0x70 + 1),
        _ => named(vk_code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown Key (VK_{})", vk_code)),
    }
}

fn named(vk_code: u8) -> Option<&'static str> {
    let name = match vk_code {
        0x01 => "Left Mouse Button",
        0x02 => "Right Mouse Button",
        0x03 => "Cancel",
        0x04 => "Middle Mouse Button",
        0x05 => "X1 Mouse Button",
        0x06 => "X2 Mouse Button",
        0x08 => "Backspace",
        0x09 => "Tab",
        0x0C => "Clear",
        0x0D => "Enter",
        0x10 => "Shift",
        0x11 => "Ctrl",
        0x12 => "Alt",
        0x13 => "Pause",
        0x14 => "Caps Lock",
        0x1B => "Esc",
        0x20 => "Space",
        0x21 => "Page Up",
        0x22 => "Page Down",
        0x23 => "End",
        0x24 => "Home",
        0x25 => "Left",
        0x26 => "Up",
        0x27 => "Right",
        0x28 => "Down",
        0x2C => "Print Screen",
        0x2D => "Insert",
        0x2E => "Delete",
        0x5B => "Left Windows",
        0x5C => "Right Windows",
        0x5D => "Applications",
        0x6A => "Num *",
        0x6B => "Num +",
        0x6D => "Num -",
        0x6E => "Num .",
        0x6F => "Num /",
        0x90 => "Num Lock",
        0x91 => "Scroll Lock",
        0xA0 => "Left Shift",
        0xA1 => "Right Shift",
        0xA2 => "Left Ctrl",
        0xA3 => "Right Ctrl",
        0xA4 => "Left Alt",
        0xA5 => "Right Alt",
        0xAD => "Volume Mute",
        0xAE => "Volume Down",
        0xAF => "Volume Up",
        0xB0 => "Next Track",
        0xB1 => "Previous Track",
        0xB2 => "Stop",
        0xB3 => "Play/Pause",
        0xBA => ";",
        0xBB => "=",
        0xBC => ",",
        0xBD => "-",
        0xBE => ".",
        0xBF => "/",
        0xC0 => "`",
        0xDB => "[",
        0xDC => "\\",
        0xDD => "]",
        0xDE => "'",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(0x41), "A");
        assert_eq!(key_name(0x35), "5");
        assert_eq!(key_name(0x70), "F1");
        assert_eq!(key_name(0x87), "F24");
        assert_eq!(key_name(0x63), "Num 3");
        assert_eq!(key_name(0xA2), "Left Ctrl");
        assert_eq!(key_name(0xFF), "Unknown Key (VK_255)");
    }
}
