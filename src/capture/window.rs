//! Window discovery for the emulator window.

/// Returns true if a top-level window with exactly `title` exists.
#[cfg(windows)]
pub fn is_emulator_window_present(title: &str) -> bool {
    find_window_by_title(title).is_some()
}

/// Returns the raw handle of the window titled `title`, if any.
#[cfg(windows)]
pub fn find_window_by_title(title: &str) -> Option<isize> {
    use windows::core::PCWSTR;
    use windows::Win32::UI::WindowsAndMessaging::FindWindowW;

    let wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
    // FindWindowW reports "not found" as an error in this binding
    let hwnd = unsafe { FindWindowW(PCWSTR::null(), PCWSTR(wide.as_ptr())) }.ok()?;
    if hwnd.0.is_null() {
        None
    } else {
        Some(hwnd.0 as isize)
    }
}

/// The emulator only runs on Windows; elsewhere it is never present.
#[cfg(not(windows))]
pub fn is_emulator_window_present(_title: &str) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_title_is_absent() {
        assert!(!is_emulator_window_present(
            "tcg-match-tracker test window that does not exist"
        ));
    }
}
