/// Return a long version of the function name.
#[macro_export]
macro_rules! function {
    () => {{
        fn _f() {}
        fn _type_name_of<T>(_: T) -> &'static str {
            core::any::type_name::<T>()
        }
        let name = _type_name_of(_f);
        &name[..name.len() - "::_f".len()]
    }};
}

/// Return a shortened version of the function name.
#[macro_export]
macro_rules! short_function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            core::any::type_name::<T>()
        }
        let name = type_name_of(f);

        // Find and cut the rest of the path
        match &name[..name.len() - 3].rfind(':') {
            Some(pos) => &name[pos + 1..name.len() - 3],
            None => &name[..name.len() - 3],
        }
    }};
}

/// log the channel state at the trace level
#[macro_export]
macro_rules! trace_channel_state {
    ($agent: expr) => {
        #[cfg(not(feature = "debug_channel_state"))]
        trace!("{}:\n{:#?}", function!(), $agent);
        #[cfg(feature = "debug_channel_state")]
        debug!("{}:\n{:#?}", function!(), $agent);
    };
}

/// Debug printer for byte strings, hex encoded
pub struct DebugBytes<'a>(pub &'a [u8]);
impl<'a> core::fmt::Debug for DebugBytes<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
        for i in self.0 {
            write!(f, "{:02x}", i)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_bytes_test() {
        assert_eq!(format!("{:?}", DebugBytes(&[0x01, 0xab])), "01ab");
    }

    #[test]
    fn function_name_test() {
        assert_eq!(short_function!(), "function_name_test");
        assert_eq!(function!(), concat!(module_path!(), "::function_name_test"));
    }
}
