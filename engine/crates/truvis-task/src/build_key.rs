use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// 构建产物的身份：对源码 + 入口 + 编译参数等内容做 64 位 hash
///
/// 构建缓存只把它当作不透明的 key，不做冲突检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildKey(pub u64);

impl BuildKey {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    /// 对任意 `Hash` 值求 key，只在当前进程内稳定
    pub fn of<H: Hash + ?Sized>(value: &H) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// 对字节内容求 key（FNV-1a），跨进程稳定
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Self::fnv1a(Self::FNV_OFFSET, bytes))
    }

    /// 在当前 key 的基础上继续混入内容，例如 shader 源码 + 编译宏
    pub fn chain(self, bytes: &[u8]) -> Self {
        Self(Self::fnv1a(self.0 ^ Self::FNV_OFFSET, bytes))
    }

    fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
        bytes
            .iter()
            .fold(seed, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(Self::FNV_PRIME))
    }
}

impl From<u64> for BuildKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_is_fnv1a() {
        // FNV-1a 的标准测试向量
        assert_eq!(BuildKey::from_bytes(b"").0, 0xcbf2_9ce4_8422_2325);
        assert_eq!(BuildKey::from_bytes(b"a").0, 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_same_content_same_key() {
        let a = BuildKey::of(&("shaders/rt/raygen.slang", "main", ["USE_BINDLESS"]));
        let b = BuildKey::of(&("shaders/rt/raygen.slang", "main", ["USE_BINDLESS"]));
        let c = BuildKey::of(&("shaders/rt/raygen.slang", "main", ["NO_BINDLESS"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chain_depends_on_both_parts() {
        let source = BuildKey::from_bytes(b"float4 main() : SV_Target { return 1; }");
        assert_ne!(source.chain(b"-O3"), source.chain(b"-O0"));
        assert_ne!(source.chain(b"-O3"), BuildKey::from_bytes(b"-O3"));
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(BuildKey(0xab).to_string(), "00000000000000ab");
    }
}
