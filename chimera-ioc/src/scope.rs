/// 实例的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 单例模式 - 每个注入器中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次解析都创建新实例
    Prototype,
}
