pub mod strain_typing;
